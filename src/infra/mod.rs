//! Infrastructure - configuration and metrics

pub mod config;
pub mod metrics;

pub use config::{Config, ConfigError};
pub use metrics::{Metrics, MetricsSummary};
