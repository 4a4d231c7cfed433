//! Services - analysis pipeline and runtime actors
//!
//! - `tracker` - Frame-to-frame entity identity
//! - `crossing` - Directional line-crossing counts with cooldown
//! - `zones` - Per-zone counts and density
//! - `aggregator` - Running totals and snapshot assembly
//! - `session` - One tick of the synchronous pipeline
//! - `supervisor` - Camera connection state machine with backoff
//! - `scheduler` - Interval driver for the session

pub mod aggregator;
pub mod crossing;
pub mod scheduler;
pub mod session;
pub mod supervisor;
pub mod tracker;
pub mod zones;

// Re-export commonly used types
pub use aggregator::{Aggregator, SnapshotBus};
pub use crossing::CrossingDetector;
pub use scheduler::{create_scheduler, SchedulerHandle, SchedulerSettings, TickScheduler};
pub use session::{AnalysisSession, TickInput, TickOutput};
pub use supervisor::{create_supervisor, ConnectionSupervisor, SupervisorHandle, SupervisorSettings};
pub use tracker::{EntityTracker, TrackerSettings};
pub use zones::ZoneAnalyzer;
