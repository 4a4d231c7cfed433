//! Domain models - value types shared by the analytics pipeline
//!
//! - `types` - detections, tracked entities, crossing events
//! - `geometry` - crossing line and zone regions
//! - `snapshot` - per-tick analytics snapshot and connection state

pub mod geometry;
pub mod snapshot;
pub mod types;
