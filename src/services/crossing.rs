//! Line crossing detection with per-entity cooldown
//!
//! A crossing is a strict sign flip of the entity's side of the line between
//! its previous and current centroid. Positions exactly on the line have no
//! side; when the previous centroid sat on the line, the last side the entity
//! was seen on stands in for it. Only entities refreshed this tick are
//! evaluated, so each step of motion is looked at once.

use crate::domain::geometry::{CrossingLine, LineSide};
use crate::domain::types::{CrossingDirection, CrossingEvent, EntityId, Heading, TrackedEntity};
use crate::services::tracker::EntityTracker;
use smallvec::SmallVec;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Result of evaluating one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossingCheck {
    NoCrossing,
    /// Flip seen inside the cooldown window
    Suppressed(CrossingDirection),
    Crossed(CrossingDirection),
}

/// Crossings counted in one tick
#[derive(Debug, Default)]
pub struct CrossingOutcome {
    pub events: SmallVec<[CrossingEvent; 4]>,
    pub suppressed: u32,
}

impl CrossingOutcome {
    pub fn entries(&self) -> u64 {
        self.events.iter().filter(|e| e.direction == CrossingDirection::Entry).count() as u64
    }

    pub fn exits(&self) -> u64 {
        self.events.iter().filter(|e| e.direction == CrossingDirection::Exit).count() as u64
    }
}

pub struct CrossingDetector {
    line: Option<CrossingLine>,
    cooldown: Duration,
}

impl CrossingDetector {
    /// Without a line nothing is ever counted
    pub fn new(line: Option<CrossingLine>, cooldown: Duration) -> Self {
        Self { line, cooldown }
    }

    /// Evaluate one entity's last step against the line
    pub fn check(&self, entity: &TrackedEntity, now: Instant) -> CrossingCheck {
        let (Some(line), Some(previous)) = (self.line.as_ref(), entity.previous_position) else {
            return CrossingCheck::NoCrossing;
        };
        let from = match line.side_of(previous) {
            LineSide::On => entity.line_side.unwrap_or(LineSide::On),
            side => side,
        };
        let Some(direction) = line.direction(from, line.side_of(entity.position)) else {
            return CrossingCheck::NoCrossing;
        };
        match entity.last_crossing_at {
            Some(at) if now.saturating_duration_since(at) < self.cooldown => {
                CrossingCheck::Suppressed(direction)
            }
            _ => CrossingCheck::Crossed(direction),
        }
    }

    /// Evaluate the entities matched this tick, stamping counted ones
    pub fn detect(
        &self,
        tracker: &mut EntityTracker,
        matched: &[EntityId],
        now: Instant,
    ) -> CrossingOutcome {
        let mut outcome = CrossingOutcome::default();
        let Some(line) = self.line.as_ref() else {
            return outcome;
        };

        for &id in matched {
            let Some(entity) = tracker.get_mut(id) else { continue };
            let check = self.check(entity, now);
            remember_side(entity, line);
            match check {
                CrossingCheck::NoCrossing => {}
                CrossingCheck::Suppressed(direction) => {
                    debug!(entity_id = %id, direction = direction.as_str(), "crossing_suppressed");
                    outcome.suppressed += 1;
                }
                CrossingCheck::Crossed(direction) => {
                    entity.last_crossing_at = Some(now);
                    // previous_position is always set once a flip was found
                    let from = entity.previous_position.unwrap_or(entity.position);
                    let heading = Heading::from_motion(from, entity.position);
                    info!(
                        entity_id = %id,
                        direction = direction.as_str(),
                        heading = ?heading,
                        "crossing_counted"
                    );
                    outcome.events.push(CrossingEvent {
                        entity_id: id,
                        direction,
                        heading,
                        position: entity.position,
                    });
                }
            }
        }

        outcome
    }
}

/// Keep the latest off-line side, preferring the current centroid
fn remember_side(entity: &mut TrackedEntity, line: &CrossingLine) {
    let side = [Some(entity.position), entity.previous_position]
        .into_iter()
        .flatten()
        .map(|p| line.side_of(p))
        .find(|side| *side != LineSide::On);
    if side.is_some() {
        entity.line_side = side;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::geometry::EntryTransition;
    use crate::domain::types::{BoundingBox, Detection, ObjectClass, Point};
    use crate::services::tracker::TrackerSettings;

    const COOLDOWN: Duration = Duration::from_secs(3);

    fn person(x: f64, y: f64) -> Detection {
        Detection::new(ObjectClass::Person, 0.9, BoundingBox::new(x, y, 20.0, 40.0))
    }

    /// Horizontal line at y=120 where moving down (increasing y) is an entry
    fn detector() -> CrossingDetector {
        let line = CrossingLine::new(
            Point::new(0.0, 120.0),
            Point::new(640.0, 120.0),
            EntryTransition::NegativeToPositive,
        );
        CrossingDetector::new(Some(line), COOLDOWN)
    }

    fn step(
        tracker: &mut EntityTracker,
        detector: &CrossingDetector,
        detections: &[Detection],
        now: Instant,
    ) -> CrossingOutcome {
        let update = tracker.update(detections, now);
        detector.detect(tracker, &update.matched, now)
    }

    #[test]
    fn test_single_monotonic_crossing_counts_once() {
        let mut tracker = EntityTracker::new(TrackerSettings::default());
        let detector = detector();
        let t0 = Instant::now();

        let mut events = Vec::new();
        // Centroid y runs 55..155 in steps of 20, crossing 120 between 115 and 135
        for (i, y) in [35.0, 55.0, 75.0, 95.0, 115.0, 135.0].iter().enumerate() {
            let now = t0 + Duration::from_secs(i as u64 * 4);
            events.extend(step(&mut tracker, &detector, &[person(100.0, *y)], now).events);
        }

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].direction, CrossingDirection::Entry);
        assert_eq!(events[0].heading, Heading::Down);
        assert_eq!(events[0].entity_id, EntityId(1));
    }

    #[test]
    fn test_reverse_crossing_is_exit() {
        let mut tracker = EntityTracker::new(TrackerSettings::default());
        let detector = detector();
        let t0 = Instant::now();

        step(&mut tracker, &detector, &[person(100.0, 120.0)], t0);
        let outcome = step(&mut tracker, &detector, &[person(100.0, 60.0)], t0 + Duration::from_secs(1));

        assert_eq!(outcome.exits(), 1);
        assert_eq!(outcome.entries(), 0);
        assert_eq!(outcome.events[0].heading, Heading::Up);
    }

    #[test]
    fn test_second_crossing_within_cooldown_suppressed() {
        let mut tracker = EntityTracker::new(TrackerSettings::default());
        let detector = detector();
        let t0 = Instant::now();

        step(&mut tracker, &detector, &[person(100.0, 60.0)], t0);
        let first = step(&mut tracker, &detector, &[person(100.0, 120.0)], t0 + Duration::from_secs(1));
        let second = step(&mut tracker, &detector, &[person(100.0, 60.0)], t0 + Duration::from_secs(2));

        assert_eq!(first.events.len(), 1);
        assert!(second.events.is_empty());
        assert_eq!(second.suppressed, 1);

        // After the cooldown the same motion counts again
        let third = step(&mut tracker, &detector, &[person(100.0, 120.0)], t0 + Duration::from_secs(5));
        assert_eq!(third.entries(), 1);
    }

    #[test]
    fn test_jitter_on_one_side_never_counts() {
        let mut tracker = EntityTracker::new(TrackerSettings::default());
        let detector = detector();
        let t0 = Instant::now();

        let mut total = 0;
        for (i, y) in [70.0, 72.0, 69.0, 75.0, 71.0, 78.0, 70.0].iter().enumerate() {
            let now = t0 + Duration::from_secs(i as u64);
            total += step(&mut tracker, &detector, &[person(100.0, *y)], now).events.len();
        }
        assert_eq!(total, 0);
    }

    #[test]
    fn test_touching_the_line_is_not_a_flip() {
        let mut tracker = EntityTracker::new(TrackerSettings::default());
        let detector = detector();
        let t0 = Instant::now();

        // Centroid y: 80 -> 120 (on the line) -> 80
        step(&mut tracker, &detector, &[person(100.0, 60.0)], t0);
        let onto = step(&mut tracker, &detector, &[person(100.0, 100.0)], t0 + Duration::from_secs(4));
        let back = step(&mut tracker, &detector, &[person(100.0, 60.0)], t0 + Duration::from_secs(8));

        assert!(onto.events.is_empty());
        assert!(back.events.is_empty());
    }

    #[test]
    fn test_pause_on_line_then_continue_counts_once() {
        let mut tracker = EntityTracker::new(TrackerSettings::default());
        let detector = detector();
        let t0 = Instant::now();

        // Centroid y: 80 -> 120 (stops on the line) -> 120 -> 160
        let mut events = Vec::new();
        for (i, y) in [60.0, 100.0, 100.0, 140.0].iter().enumerate() {
            let now = t0 + Duration::from_secs(i as u64 * 4);
            events.extend(step(&mut tracker, &detector, &[person(100.0, *y)], now).events);
        }

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].direction, CrossingDirection::Entry);
        assert_eq!(tracker.get(EntityId(1)).unwrap().line_side, Some(LineSide::Positive));
    }

    #[test]
    fn test_spawned_on_line_needs_a_side_first() {
        let mut tracker = EntityTracker::new(TrackerSettings::default());
        let detector = detector();
        let t0 = Instant::now();

        step(&mut tracker, &detector, &[person(100.0, 100.0)], t0);
        let off = step(&mut tracker, &detector, &[person(100.0, 140.0)], t0 + Duration::from_secs(4));

        assert!(off.events.is_empty());
        assert_eq!(tracker.get(EntityId(1)).unwrap().line_side, Some(LineSide::Positive));
    }

    #[test]
    fn test_new_entity_never_crosses() {
        let mut tracker = EntityTracker::new(TrackerSettings::default());
        let detector = detector();
        let outcome = step(&mut tracker, &detector, &[person(100.0, 200.0)], Instant::now());
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn test_no_line_counts_nothing() {
        let mut tracker = EntityTracker::new(TrackerSettings::default());
        let detector = CrossingDetector::new(None, COOLDOWN);
        let t0 = Instant::now();

        step(&mut tracker, &detector, &[person(100.0, 40.0)], t0);
        let outcome = step(&mut tracker, &detector, &[person(100.0, 200.0)], t0 + Duration::from_secs(1));
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn test_check_reports_suppression_direction() {
        let detector = detector();
        let now = Instant::now();
        let mut entity = TrackedEntity::new(EntityId(7), &person(100.0, 60.0), now);
        entity.observe(&person(100.0, 140.0), now);
        entity.last_crossing_at = Some(now);

        assert_eq!(
            detector.check(&entity, now + Duration::from_secs(1)),
            CrossingCheck::Suppressed(CrossingDirection::Entry)
        );
        assert_eq!(
            detector.check(&entity, now + COOLDOWN),
            CrossingCheck::Crossed(CrossingDirection::Entry)
        );
    }
}
