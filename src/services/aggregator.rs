//! Snapshot aggregation and publishing
//!
//! The aggregator owns the cumulative counters for a session. Entries and
//! exits only grow, until an operator calls `reset_counters`.

use crate::domain::snapshot::{
    AnalyticsSnapshot, ConnectionState, DensityLevel, ObjectCounts,
};
use crate::domain::types::TrackedEntity;
use crate::infra::config::Config;
use crate::services::crossing::CrossingOutcome;
use crate::services::zones::ZoneAnalysis;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Occupancy step function over percentage of capacity
#[derive(Debug, Clone, Copy)]
pub struct DensityThresholds {
    pub capacity: u32,
    pub medium_above: f64,
    pub high_above: f64,
    pub very_high_above: f64,
}

impl DensityThresholds {
    pub fn from_config(config: &Config) -> Self {
        Self {
            capacity: config.capacity(),
            medium_above: config.medium_above(),
            high_above: config.high_above(),
            very_high_above: config.very_high_above(),
        }
    }

    /// Occupancy as a percentage of capacity, uncapped
    #[inline]
    pub fn percent(&self, occupancy: u32) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        occupancy as f64 / self.capacity as f64 * 100.0
    }

    pub fn level(&self, occupancy: u32) -> DensityLevel {
        let pct = self.percent(occupancy);
        if pct > self.very_high_above {
            DensityLevel::VeryHigh
        } else if pct > self.high_above {
            DensityLevel::High
        } else if pct > self.medium_above {
            DensityLevel::Medium
        } else {
            DensityLevel::Low
        }
    }
}

impl Default for DensityThresholds {
    fn default() -> Self {
        Self { capacity: 50, medium_above: 25.0, high_above: 50.0, very_high_above: 80.0 }
    }
}

/// Everything the aggregator needs from one tick
#[derive(Debug)]
pub struct TickFacts<'a> {
    pub timestamp_ms: u64,
    pub now: Instant,
    /// Person detections accepted this tick
    pub occupancy: u32,
    pub tracked_entities: u32,
    pub crossings: &'a CrossingOutcome,
    pub evicted: &'a [TrackedEntity],
    pub zones: ZoneAnalysis,
    pub object_counts: ObjectCounts,
    pub connection: ConnectionState,
    pub detector_ok: bool,
}

pub struct Aggregator {
    session_id: String,
    tick: u64,
    entries: u64,
    exits: u64,
    peak_occupancy: u32,
    dwell_secs: VecDeque<f64>,
    dwell_window: usize,
    thresholds: DensityThresholds,
}

impl Aggregator {
    pub fn new(session_id: String, thresholds: DensityThresholds, dwell_window: usize) -> Self {
        Self {
            session_id,
            tick: 0,
            entries: 0,
            exits: 0,
            peak_occupancy: 0,
            dwell_secs: VecDeque::with_capacity(dwell_window),
            dwell_window: dwell_window.max(1),
            thresholds,
        }
    }

    /// Fold one tick into the counters and build its snapshot
    pub fn build(&mut self, facts: TickFacts<'_>) -> AnalyticsSnapshot {
        self.tick += 1;
        self.entries += facts.crossings.entries();
        self.exits += facts.crossings.exits();
        self.peak_occupancy = self.peak_occupancy.max(facts.occupancy);

        for entity in facts.evicted {
            if self.dwell_secs.len() == self.dwell_window {
                self.dwell_secs.pop_front();
            }
            self.dwell_secs.push_back(entity.age(facts.now).as_secs_f64());
        }

        let average_dwell_secs = if self.dwell_secs.is_empty() {
            None
        } else {
            Some(self.dwell_secs.iter().sum::<f64>() / self.dwell_secs.len() as f64)
        };

        let density_level = self.thresholds.level(facts.occupancy);

        debug!(
            tick = %self.tick,
            occupancy = %facts.occupancy,
            density = density_level.as_str(),
            entries = %self.entries,
            exits = %self.exits,
            "snapshot_built"
        );

        AnalyticsSnapshot {
            session_id: self.session_id.clone(),
            tick: self.tick,
            timestamp_ms: facts.timestamp_ms,
            current_occupancy: facts.occupancy,
            tracked_entities: facts.tracked_entities,
            cumulative_entries: self.entries,
            cumulative_exits: self.exits,
            net_flow: self.entries.saturating_sub(self.exits),
            occupancy_percent: self.thresholds.percent(facts.occupancy).min(100.0),
            peak_occupancy: self.peak_occupancy,
            density_level,
            zone_breakdown: facts.zones.stats,
            busiest_zone: facts.zones.busiest,
            quietest_zone: facts.zones.quietest,
            average_dwell_secs,
            object_counts: facts.object_counts,
            connection: facts.connection,
            detector_ok: facts.detector_ok,
        }
    }

    /// Operator reset: zero entries, exits, peak and the dwell window
    pub fn reset_counters(&mut self) {
        info!(entries = %self.entries, exits = %self.exits, "counters_reset");
        self.entries = 0;
        self.exits = 0;
        self.peak_occupancy = 0;
        self.dwell_secs.clear();
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Fan-out of snapshots to subscribers, plus the latest one for polling
#[derive(Clone)]
pub struct SnapshotBus {
    tx: broadcast::Sender<Arc<AnalyticsSnapshot>>,
    latest: Arc<RwLock<Option<Arc<AnalyticsSnapshot>>>>,
}

impl SnapshotBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, latest: Arc::new(RwLock::new(None)) }
    }

    /// Returns the number of live subscribers that received it
    pub fn publish(&self, snapshot: AnalyticsSnapshot) -> usize {
        let snapshot = Arc::new(snapshot);
        *self.latest.write() = Some(snapshot.clone());
        // No subscribers is not an error
        self.tx.send(snapshot).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AnalyticsSnapshot>> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Option<Arc<AnalyticsSnapshot>> {
        self.latest.read().clone()
    }
}
