//! Typed channel for MQTT egress messages
//!
//! Provides a non-blocking way to send events to the MQTT publisher.
//! Uses a bounded mpsc channel; when it is full messages are dropped and counted.

use crate::domain::snapshot::{AnalyticsSnapshot, ConnectionState, DisconnectReason};
use crate::domain::types::{epoch_ms, CrossingDirection, CrossingEvent, Heading};
use crate::infra::metrics::Metrics;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Per-tick snapshot, pre-serialized
    Snapshot(SnapshotPayload),
    /// Counted line crossing
    Crossing(CrossingPayload),
    /// Connection state change
    Connection(ConnectionPayload),
}

/// Payload for snapshots
#[derive(Debug)]
pub struct SnapshotPayload {
    pub json: String,
}

#[derive(Serialize)]
struct SiteSnapshot<'a> {
    site: &'a str,
    #[serde(flatten)]
    snapshot: &'a AnalyticsSnapshot,
}

/// Payload for crossing events
#[derive(Debug, Clone, Serialize)]
pub struct CrossingPayload {
    /// Site identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Timestamp (epoch ms)
    pub ts: u64,
    /// Tracker entity ID
    pub eid: u64,
    pub direction: CrossingDirection,
    pub heading: Heading,
    /// Centroid at the counting tick (pixels)
    pub x: f64,
    pub y: f64,
}

impl CrossingPayload {
    pub fn from_event(event: &CrossingEvent, ts: u64) -> Self {
        Self {
            site: None,
            ts,
            eid: event.entity_id.0,
            direction: event.direction,
            heading: event.heading,
            x: event.position.x,
            y: event.position.y,
        }
    }
}

/// Payload for connection state changes
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionPayload {
    /// Site identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Timestamp (epoch ms)
    pub ts: u64,
    /// disconnected, connecting, connected, reconnecting
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DisconnectReason>,
}

impl ConnectionPayload {
    pub fn from_state(state: &ConnectionState, ts: u64) -> Self {
        let (attempt, reason) = match state {
            ConnectionState::Reconnecting { attempt } => (Some(*attempt), None),
            ConnectionState::Disconnected { reason } => (None, Some(*reason)),
            _ => (None, None),
        };
        Self { site: None, ts, state: state.as_str(), attempt, reason }
    }
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
    metrics: Option<Arc<Metrics>>,
}

impl EgressSender {
    /// Create a new sender from an mpsc sender
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String) -> Self {
        Self { tx, site_id, metrics: None }
    }

    /// Count dropped messages in the given metrics
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn try_send(&self, msg: EgressMessage) {
        if self.tx.try_send(msg).is_err() {
            debug!("egress_message_dropped");
            if let Some(metrics) = &self.metrics {
                metrics.record_egress_dropped();
            }
        }
    }

    /// Send a snapshot for publishing
    /// Includes site_id in the JSON payload
    pub fn send_snapshot(&self, snapshot: &AnalyticsSnapshot) {
        let body = SiteSnapshot { site: &self.site_id, snapshot };
        if let Ok(json) = serde_json::to_string(&body) {
            self.try_send(EgressMessage::Snapshot(SnapshotPayload { json }));
        }
    }

    /// Send a counted crossing
    /// Injects site_id into the payload
    pub fn send_crossing(&self, event: &CrossingEvent) {
        let mut payload = CrossingPayload::from_event(event, epoch_ms());
        payload.site = Some(self.site_id.clone());
        self.try_send(EgressMessage::Crossing(payload));
    }

    /// Send a connection state change
    /// Injects site_id into the payload
    pub fn send_connection_state(&self, state: &ConnectionState) {
        let mut payload = ConnectionPayload::from_state(state, epoch_ms());
        payload.site = Some(self.site_id.clone());
        self.try_send(EgressMessage::Connection(payload));
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
/// site_id is included in every payload for downstream consumers.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id), rx)
}
