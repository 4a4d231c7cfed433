//! One analysis session: the synchronous tick pipeline
//!
//! tracker -> crossing detector -> zone analyzer -> aggregator
//!
//! `tick` does no I/O and reads no clock; the caller supplies `now`.

use crate::domain::snapshot::{new_uuid_v7, AnalyticsSnapshot, ConnectionState, ObjectCounts};
use crate::domain::types::{CrossingEvent, Detection, ObjectClass};
use crate::infra::config::{Config, ConfigError};
use crate::services::aggregator::{Aggregator, DensityThresholds, TickFacts};
use crate::services::crossing::CrossingDetector;
use crate::services::tracker::{EntityTracker, TrackerSettings};
use crate::services::zones::ZoneAnalyzer;
use smallvec::SmallVec;
use std::time::Instant;
use tracing::info;

/// Inputs for one tick
#[derive(Debug, Clone)]
pub struct TickInput {
    pub now: Instant,
    pub timestamp_ms: u64,
    /// `None` when detection failed or was skipped this tick
    pub detections: Option<Vec<Detection>>,
    pub connection: ConnectionState,
}

/// Per-tick counters for metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub created: u32,
    pub evicted: u32,
    pub rejected: u32,
    pub ignored: u32,
    pub suppressed: u32,
}

#[derive(Debug, Clone)]
pub struct TickOutput {
    pub snapshot: AnalyticsSnapshot,
    pub crossings: SmallVec<[CrossingEvent; 4]>,
    pub stats: TickStats,
}

pub struct AnalysisSession {
    tracker: EntityTracker,
    crossing: CrossingDetector,
    zones: ZoneAnalyzer,
    aggregator: Aggregator,
    min_confidence: f64,
}

impl AnalysisSession {
    /// Validate the configuration and build a fresh session
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let zones = config.zones()?;
        let session_id = new_uuid_v7();

        info!(
            session_id = %session_id,
            zones = %zones.len(),
            line = config.line().is_some(),
            capacity = %config.capacity(),
            "session_started"
        );

        Ok(Self {
            tracker: EntityTracker::new(TrackerSettings::from_config(config)),
            crossing: CrossingDetector::new(config.line(), config.cooldown()),
            zones: ZoneAnalyzer::new(zones, config.frame_width(), config.frame_height()),
            aggregator: Aggregator::new(
                session_id,
                DensityThresholds::from_config(config),
                config.dwell_window(),
            ),
            min_confidence: config.min_confidence(),
        })
    }

    /// Run one tick of the pipeline
    pub fn tick(&mut self, input: TickInput) -> TickOutput {
        let detector_ok = input.detections.is_some();
        let detections = input.detections.unwrap_or_default();

        let update = self.tracker.update(&detections, input.now);
        let crossings = self.crossing.detect(&mut self.tracker, &update.matched, input.now);

        // Zones see every entity refreshed this tick
        let centroids = update
            .matched
            .iter()
            .chain(update.created.iter())
            .filter_map(|id| self.tracker.get(*id).map(|e| e.position));
        let zones = self.zones.analyze(centroids);

        let (object_counts, objects_rejected) = count_objects(&detections, self.min_confidence);

        let snapshot = self.aggregator.build(TickFacts {
            timestamp_ms: input.timestamp_ms,
            now: input.now,
            occupancy: update.accepted,
            tracked_entities: self.tracker.len() as u32,
            crossings: &crossings,
            evicted: &update.evicted,
            zones,
            object_counts,
            connection: input.connection,
            detector_ok,
        });

        let stats = TickStats {
            created: update.created.len() as u32,
            evicted: update.evicted.len() as u32,
            rejected: update.rejected + objects_rejected,
            ignored: update.ignored,
            suppressed: crossings.suppressed,
        };

        TickOutput { snapshot, crossings: crossings.events, stats }
    }

    /// Operator reset of entries, exits, peak and dwell
    pub fn reset_counters(&mut self) {
        self.aggregator.reset_counters();
    }

    pub fn session_id(&self) -> &str {
        self.aggregator.session_id()
    }
}

/// Count usable non-person detections; returns the counts and how many were implausible
fn count_objects(detections: &[Detection], min_confidence: f64) -> (ObjectCounts, u32) {
    let mut counts = ObjectCounts::default();
    let mut rejected = 0;
    for d in detections.iter().filter(|d| d.class != ObjectClass::Person) {
        if d.validate().is_err() {
            rejected += 1;
            continue;
        }
        if d.confidence < min_confidence {
            continue;
        }
        match d.class {
            ObjectClass::Table => counts.tables += 1,
            ObjectClass::Chair => counts.chairs += 1,
            _ => counts.other += 1,
        }
    }
    (counts, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::geometry::{CrossingLine, EntryTransition};
    use crate::domain::snapshot::DensityLevel;
    use crate::domain::types::{BoundingBox, CrossingDirection, Point};
    use std::time::Duration;

    const CONFIG: &str = r#"
[line]
x1 = 0.0
y1 = 120.0
x2 = 640.0
y2 = 120.0
entry_transition = "negative_to_positive"

[[zones]]
name = "door"
rect = [0.0, 0.0, 50.0, 100.0]

[[zones]]
name = "bar"
rect = [50.0, 0.0, 50.0, 100.0]
"#;

    fn session() -> AnalysisSession {
        AnalysisSession::new(&Config::from_toml_str(CONFIG).unwrap()).unwrap()
    }

    fn det(class: ObjectClass, x: f64, y: f64) -> Detection {
        Detection::new(class, 0.9, BoundingBox::new(x, y, 20.0, 40.0))
    }

    fn input(now: Instant, detections: Option<Vec<Detection>>) -> TickInput {
        TickInput { now, timestamp_ms: 0, detections, connection: ConnectionState::Connected }
    }

    #[test]
    fn test_crossing_scenario_counts_one_entry() {
        let mut session = session();
        let t0 = Instant::now();

        let first = session.tick(input(t0, Some(vec![det(ObjectClass::Person, 10.0, 10.0)])));
        let second = session.tick(input(
            t0 + Duration::from_secs(4),
            Some(vec![det(ObjectClass::Person, 12.0, 200.0)]),
        ));

        assert!(first.crossings.is_empty());
        assert_eq!(second.crossings.len(), 1);
        assert_eq!(second.crossings[0].direction, CrossingDirection::Entry);
        assert_eq!(second.snapshot.cumulative_entries, 1);
        assert_eq!(second.snapshot.cumulative_exits, 0);
    }

    #[test]
    fn test_crossing_scenario_on_default_tracking() {
        let line = CrossingLine::new(
            Point::new(0.0, 120.0),
            Point::new(640.0, 120.0),
            EntryTransition::NegativeToPositive,
        );
        let config = Config::default().with_line(Some(line));
        let mut session = AnalysisSession::new(&config).unwrap();
        let t0 = Instant::now();

        session.tick(input(t0, Some(vec![det(ObjectClass::Person, 10.0, 10.0)])));
        let second = session.tick(input(
            t0 + Duration::from_secs(4),
            Some(vec![det(ObjectClass::Person, 12.0, 200.0)]),
        ));

        assert_eq!(second.snapshot.cumulative_entries, 1);
        assert_eq!(second.snapshot.cumulative_exits, 0);
        assert_eq!(second.snapshot.tracked_entities, 1);
    }

    #[test]
    fn test_failed_detection_yields_empty_tick() {
        let mut session = session();
        let t0 = Instant::now();
        session.tick(input(t0, Some(vec![det(ObjectClass::Person, 10.0, 10.0)])));

        let out = session.tick(input(t0 + Duration::from_secs(4), None));

        assert!(!out.snapshot.detector_ok);
        assert_eq!(out.snapshot.current_occupancy, 0);
        // Entity is still coasting
        assert_eq!(out.snapshot.tracked_entities, 1);
    }

    #[test]
    fn test_zone_breakdown_and_objects() {
        let mut session = session();
        let out = session.tick(input(
            Instant::now(),
            Some(vec![
                det(ObjectClass::Person, 10.0, 10.0),
                det(ObjectClass::Person, 400.0, 300.0),
                det(ObjectClass::Person, 500.0, 100.0),
                det(ObjectClass::Table, 300.0, 300.0),
                det(ObjectClass::Chair, 320.0, 300.0),
                det(ObjectClass::Other, 10.0, 300.0),
            ]),
        ));

        let snapshot = out.snapshot;
        assert_eq!(snapshot.current_occupancy, 3);
        assert_eq!(snapshot.zone_breakdown[0].count, 1);
        assert_eq!(snapshot.zone_breakdown[1].count, 2);
        assert_eq!(snapshot.busiest_zone.as_deref(), Some("bar"));
        assert_eq!(snapshot.quietest_zone.as_deref(), Some("door"));
        assert_eq!(snapshot.object_counts, ObjectCounts { tables: 1, chairs: 1, other: 1 });
        assert_eq!(snapshot.density_level, DensityLevel::Low);
        assert!(snapshot.detector_ok);
    }

    #[test]
    fn test_reset_counters_keeps_tracking() {
        let mut session = session();
        let t0 = Instant::now();
        session.tick(input(t0, Some(vec![det(ObjectClass::Person, 10.0, 10.0)])));
        session.tick(input(t0 + Duration::from_secs(4), Some(vec![det(ObjectClass::Person, 12.0, 200.0)])));

        session.reset_counters();
        let out = session.tick(input(
            t0 + Duration::from_secs(8),
            Some(vec![det(ObjectClass::Person, 12.0, 205.0)]),
        ));

        assert_eq!(out.snapshot.cumulative_entries, 0);
        assert_eq!(out.snapshot.tracked_entities, 1);
    }

    #[test]
    fn test_invalid_config_rejected_before_start() {
        let config = Config::from_toml_str("[density]\ncapacity = 0\n").unwrap();
        assert!(matches!(AnalysisSession::new(&config), Err(ConfigError::ZeroCapacity)));
    }
}
