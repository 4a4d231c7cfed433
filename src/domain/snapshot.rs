//! Per-tick analytics snapshot and connection state

use serde::Serialize;
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Occupancy relative to capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DensityLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl DensityLevel {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            DensityLevel::Low => "low",
            DensityLevel::Medium => "medium",
            DensityLevel::High => "high",
            DensityLevel::VeryHigh => "very_high",
        }
    }
}

/// Why the supervisor is sitting in Disconnected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Not started yet
    Idle,
    /// Retry budget used up (camera offline)
    Exhausted,
    /// Stopped by operator or shutdown
    Stopped,
}

/// Video connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected { reason: DisconnectReason },
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected { reason: DisconnectReason::Idle }
    }
}

impl ConnectionState {
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected { .. } => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting { .. } => "reconnecting",
        }
    }

    /// Numeric value for the connection-state gauge
    pub fn gauge_value(&self) -> u64 {
        match self {
            ConnectionState::Disconnected { .. } => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting { .. } => 3,
        }
    }
}

/// Count and density for one zone in one tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneStat {
    pub name: String,
    pub count: u32,
    /// Percentage, capped at 100
    pub density: f64,
}

/// Non-person objects seen this tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ObjectCounts {
    pub tables: u32,
    pub chairs: u32,
    pub other: u32,
}

/// Aggregated view produced once per tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsSnapshot {
    pub session_id: String,
    pub tick: u64,
    pub timestamp_ms: u64,
    pub current_occupancy: u32,
    pub tracked_entities: u32,
    pub cumulative_entries: u64,
    pub cumulative_exits: u64,
    pub net_flow: u64,
    pub occupancy_percent: f64,
    pub peak_occupancy: u32,
    pub density_level: DensityLevel,
    pub zone_breakdown: Vec<ZoneStat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub busiest_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quietest_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_dwell_secs: Option<f64>,
    pub object_counts: ObjectCounts,
    pub connection: ConnectionState,
    pub detector_ok: bool,
}
