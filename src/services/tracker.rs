//! Entity tracking across consecutive ticks
//!
//! Greedy nearest-neighbour association of person centroids:
//! - detections are visited in input order
//! - candidate entities are visited in ascending id order (ties go to the lower id)
//! - a match needs distance < max_match_distance and last_seen within the TTL
//! - unmatched entities coast until `now - last_seen > ttl`, then are evicted

use crate::domain::types::{Detection, EntityId, ObjectClass, Point, TrackedEntity};
use crate::infra::config::Config;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Tracker thresholds, resolved to pixels
#[derive(Debug, Clone, Copy)]
pub struct TrackerSettings {
    pub max_match_distance_px: f64,
    pub ttl: Duration,
    pub min_confidence: f64,
}

impl TrackerSettings {
    /// Resolve the diagonal fraction against the configured frame size
    pub fn from_config(config: &Config) -> Self {
        let w = config.frame_width() as f64;
        let h = config.frame_height() as f64;
        Self {
            max_match_distance_px: config.max_match_distance() * (w * w + h * h).sqrt(),
            ttl: config.ttl(),
            min_confidence: config.min_confidence(),
        }
    }
}

impl Default for TrackerSettings {
    fn default() -> Self {
        // 25% of a 640x480 diagonal
        Self { max_match_distance_px: 200.0, ttl: Duration::from_secs(10), min_confidence: 0.5 }
    }
}

/// What one call to `update` did
#[derive(Debug, Default)]
pub struct TrackerUpdate {
    /// Existing entities refreshed this tick, in detection order
    pub matched: SmallVec<[EntityId; 16]>,
    /// Entities spawned this tick
    pub created: SmallVec<[EntityId; 8]>,
    /// Entities removed this tick (TTL elapsed)
    pub evicted: Vec<TrackedEntity>,
    /// Person detections accepted (matched or created)
    pub accepted: u32,
    /// Person detections refused as implausible
    pub rejected: u32,
    /// Person detections below the confidence floor
    pub ignored: u32,
}

/// Owns all tracked entities for one session
pub struct EntityTracker {
    entities: BTreeMap<EntityId, TrackedEntity>,
    next_id: u64,
    settings: TrackerSettings,
}

impl EntityTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self { entities: BTreeMap::new(), next_id: 1, settings }
    }

    /// Associate this tick's person detections with known entities
    pub fn update(&mut self, detections: &[Detection], now: Instant) -> TrackerUpdate {
        let mut update = TrackerUpdate::default();

        // Snapshot candidates once; ascending id order from the BTreeMap
        let candidates: Vec<(EntityId, Point, bool)> = self
            .entities
            .values()
            .map(|e| (e.id, e.position, e.unseen_for(now) <= self.settings.ttl))
            .collect();
        let mut taken = vec![false; candidates.len()];

        for detection in detections.iter().filter(|d| d.class == ObjectClass::Person) {
            if let Err(reason) = detection.validate() {
                warn!(reason = %reason, bbox = ?detection.bounding_box, "detection_rejected");
                update.rejected += 1;
                continue;
            }
            if detection.confidence < self.settings.min_confidence {
                debug!(confidence = %detection.confidence, "detection_below_confidence");
                update.ignored += 1;
                continue;
            }

            let centroid = detection.bounding_box.centroid();
            let mut best: Option<(usize, f64)> = None;
            for (i, (_, position, eligible)) in candidates.iter().enumerate() {
                if taken[i] || !eligible {
                    continue;
                }
                let distance = centroid.distance(position);
                if distance < self.settings.max_match_distance_px
                    && best.map_or(true, |(_, d)| distance < d)
                {
                    best = Some((i, distance));
                }
            }

            update.accepted += 1;
            match best {
                Some((i, distance)) => {
                    taken[i] = true;
                    let id = candidates[i].0;
                    if let Some(entity) = self.entities.get_mut(&id) {
                        entity.observe(detection, now);
                    }
                    debug!(entity_id = %id, distance = format!("{:.1}", distance), "entity_matched");
                    update.matched.push(id);
                }
                None => {
                    let id = EntityId(self.next_id);
                    self.next_id += 1;
                    self.entities.insert(id, TrackedEntity::new(id, detection, now));
                    debug!(entity_id = %id, x = %centroid.x, y = %centroid.y, "entity_created");
                    update.created.push(id);
                }
            }
        }

        let ttl = self.settings.ttl;
        let expired: SmallVec<[EntityId; 8]> = self
            .entities
            .values()
            .filter(|e| e.unseen_for(now) > ttl)
            .map(|e| e.id)
            .collect();
        for id in expired {
            if let Some(entity) = self.entities.remove(&id) {
                debug!(
                    entity_id = %id,
                    hits = %entity.hits,
                    age_ms = %entity.age(now).as_millis(),
                    "entity_evicted"
                );
                update.evicted.push(entity);
            }
        }

        update
    }

    /// Entities in ascending id order
    pub fn entities(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.entities.values()
    }

    pub fn get(&self, id: EntityId) -> Option<&TrackedEntity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut TrackedEntity> {
        self.entities.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Drop all entities. Ids keep increasing.
    pub fn reset(&mut self) {
        self.entities.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::BoundingBox;

    fn person(x: f64, y: f64) -> Detection {
        Detection::new(ObjectClass::Person, 0.9, BoundingBox::new(x, y, 20.0, 40.0))
    }

    fn tracker() -> EntityTracker {
        EntityTracker::new(TrackerSettings::default())
    }

    #[test]
    fn test_creates_entities_for_new_detections() {
        let mut tracker = tracker();
        let now = Instant::now();

        let update = tracker.update(&[person(10.0, 10.0), person(300.0, 300.0)], now);

        assert_eq!(update.created.as_slice(), &[EntityId(1), EntityId(2)]);
        assert!(update.matched.is_empty());
        assert_eq!(update.accepted, 2);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_matches_nearby_detection() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(&[person(10.0, 10.0)], t0);

        let t1 = t0 + Duration::from_secs(5);
        let update = tracker.update(&[person(40.0, 30.0)], t1);

        assert_eq!(update.matched.as_slice(), &[EntityId(1)]);
        assert!(update.created.is_empty());
        let entity = tracker.get(EntityId(1)).unwrap();
        assert_eq!(entity.previous_position, Some(BoundingBox::new(10.0, 10.0, 20.0, 40.0).centroid()));
        assert_eq!(entity.last_seen, t1);
        assert_eq!(entity.first_seen, t0);
    }

    #[test]
    fn test_far_detection_spawns_new_entity() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(&[person(10.0, 10.0)], t0);

        let update = tracker.update(&[person(500.0, 400.0)], t0 + Duration::from_secs(1));

        assert_eq!(update.created.as_slice(), &[EntityId(2)]);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_each_entity_matched_once() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(&[person(100.0, 100.0)], t0);

        // Both detections are close to entity 1; only the first in input order gets it
        let t1 = t0 + Duration::from_secs(1);
        let update = tracker.update(&[person(105.0, 100.0), person(102.0, 100.0)], t1);

        assert_eq!(update.matched.as_slice(), &[EntityId(1)]);
        assert_eq!(update.created.as_slice(), &[EntityId(2)]);
        assert_eq!(tracker.get(EntityId(1)).unwrap().bounding_box.x, 105.0);
    }

    #[test]
    fn test_tie_goes_to_lower_id() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(&[person(100.0, 100.0), person(200.0, 100.0)], t0);

        // Equidistant from both entities
        let update = tracker.update(&[person(150.0, 100.0)], t0 + Duration::from_secs(1));
        assert_eq!(update.matched.as_slice(), &[EntityId(1)]);
    }

    #[test]
    fn test_zero_detections_ages_entities() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(&[person(10.0, 10.0)], t0);

        let update = tracker.update(&[], t0 + Duration::from_secs(5));
        assert!(update.created.is_empty());
        assert!(update.evicted.is_empty());
        assert_eq!(tracker.len(), 1);

        // Exactly at the TTL the entity is still retained
        let update = tracker.update(&[], t0 + Duration::from_secs(10));
        assert!(update.evicted.is_empty());

        let update = tracker.update(&[], t0 + Duration::from_millis(10_001));
        assert_eq!(update.evicted.len(), 1);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_eviction_then_new_identity_at_same_location() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(&[person(10.0, 10.0)], t0);

        let t1 = t0 + Duration::from_secs(11);
        let update = tracker.update(&[person(10.0, 10.0)], t1);

        assert_eq!(update.evicted.len(), 1);
        assert_eq!(update.evicted[0].id, EntityId(1));
        assert_eq!(update.created.as_slice(), &[EntityId(2)]);
    }

    #[test]
    fn test_rejects_implausible_and_ignores_low_confidence() {
        let mut tracker = tracker();
        let now = Instant::now();
        let bad = Detection::new(ObjectClass::Person, 0.9, BoundingBox::new(0.0, 0.0, 0.0, 10.0));
        let weak = Detection::new(ObjectClass::Person, 0.2, BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        let chair = Detection::new(ObjectClass::Chair, 0.9, BoundingBox::new(0.0, 0.0, 10.0, 10.0));

        let update = tracker.update(&[bad, weak, chair], now);

        assert_eq!(update.rejected, 1);
        assert_eq!(update.ignored, 1);
        assert_eq!(update.accepted, 0);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_reset_keeps_ids_monotonic() {
        let mut tracker = tracker();
        let now = Instant::now();
        tracker.update(&[person(10.0, 10.0)], now);
        tracker.reset();
        assert!(tracker.is_empty());

        let update = tracker.update(&[person(10.0, 10.0)], now);
        assert_eq!(update.created.as_slice(), &[EntityId(2)]);
    }

    #[test]
    fn test_settings_from_config() {
        let settings = TrackerSettings::from_config(&Config::default());
        assert!((settings.max_match_distance_px - 200.0).abs() < 1e-9);
        assert_eq!(settings.ttl, Duration::from_secs(10));
    }
}
