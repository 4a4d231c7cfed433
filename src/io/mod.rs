//! IO modules - external system interfaces
//!
//! - `camera` - HTTP camera frame source and health probe
//! - `detector` - HTTP object-detection client
//! - `egress_channel` - Typed channel for MQTT egress messages
//! - `mqtt_egress` - MQTT publisher for snapshots, crossings and connection state
//! - `prometheus` - Metrics and latest-snapshot HTTP endpoint
//! - `replay` - Recorded detection streams (JSONL)

pub mod camera;
pub mod detector;
pub mod egress_channel;
pub mod mqtt_egress;
pub mod prometheus;
pub mod replay;

// Re-export commonly used types
pub use camera::{CameraError, Frame, FrameSource, HealthProbe, HttpCamera};
pub use detector::{DetectError, Detector, HttpDetector};
pub use egress_channel::{create_egress_channel, EgressMessage, EgressSender};
pub use mqtt_egress::MqttPublisher;
pub use replay::{ReplayError, ReplayFrame, ReplayReader};
