//! Shared types for the analytics core

use super::geometry::LineSide;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Newtype wrapper for tracker-assigned entity IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A point in frame space (pixels, or 0-100 once normalized)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    #[inline]
    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Axis-aligned box in frame pixel space (top-left origin)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    #[inline]
    pub fn centroid(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Object classes the core cares about; everything else folds into `Other`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    Person,
    Table,
    Chair,
    Other,
}

impl std::str::FromStr for ObjectClass {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "person" => ObjectClass::Person,
            // COCO labels tables as "dining table"
            "table" | "dining table" | "dining_table" => ObjectClass::Table,
            "chair" => ObjectClass::Chair,
            _ => ObjectClass::Other,
        })
    }
}

impl ObjectClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectClass::Person => "person",
            ObjectClass::Table => "table",
            ObjectClass::Chair => "chair",
            ObjectClass::Other => "other",
        }
    }
}

/// Why a detection was refused before tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("non-finite coordinates")]
    NonFinite,
    #[error("non-positive box size")]
    NonPositiveSize,
    #[error("confidence outside [0, 1]")]
    ConfidenceOutOfRange,
}

/// One detector result for one frame. Not retained past the tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: ObjectClass,
    pub confidence: f64,
    pub bounding_box: BoundingBox,
}

impl Detection {
    pub fn new(class: ObjectClass, confidence: f64, bounding_box: BoundingBox) -> Self {
        Self { class, confidence, bounding_box }
    }

    /// Check the geometry and score are usable
    pub fn validate(&self) -> Result<(), RejectReason> {
        let b = &self.bounding_box;
        if !(b.x.is_finite() && b.y.is_finite() && b.width.is_finite() && b.height.is_finite()) {
            return Err(RejectReason::NonFinite);
        }
        if b.width <= 0.0 || b.height <= 0.0 {
            return Err(RejectReason::NonPositiveSize);
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(RejectReason::ConfidenceOutOfRange);
        }
        Ok(())
    }
}

/// Detection as it appears on the wire (detector responses, replay logs)
///
/// `bbox` is `[x, y, width, height]`; `score` is also accepted as `confidence`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDetection {
    pub class: String,
    #[serde(alias = "confidence")]
    pub score: f64,
    pub bbox: [f64; 4],
}

impl From<RawDetection> for Detection {
    fn from(raw: RawDetection) -> Self {
        let class = raw.class.parse().unwrap_or(ObjectClass::Other);
        let [x, y, width, height] = raw.bbox;
        Detection::new(class, raw.score, BoundingBox::new(x, y, width, height))
    }
}

/// A provisional identity for a person seen across consecutive ticks
#[derive(Debug, Clone)]
pub struct TrackedEntity {
    pub id: EntityId,
    pub position: Point,
    pub previous_position: Option<Point>,
    pub bounding_box: BoundingBox,
    pub confidence: f64,
    pub first_seen: Instant,
    pub last_seen: Instant,
    /// Cooldown marker written by the crossing detector
    pub last_crossing_at: Option<Instant>,
    /// Last side of the crossing line this entity was seen off the line
    pub line_side: Option<LineSide>,
    /// Ticks this entity has been matched (including creation)
    pub hits: u32,
}

impl TrackedEntity {
    pub fn new(id: EntityId, detection: &Detection, now: Instant) -> Self {
        let position = detection.bounding_box.centroid();
        Self {
            id,
            position,
            previous_position: None,
            bounding_box: detection.bounding_box,
            confidence: detection.confidence,
            first_seen: now,
            last_seen: now,
            last_crossing_at: None,
            line_side: None,
            hits: 1,
        }
    }

    /// Apply a matched detection
    pub fn observe(&mut self, detection: &Detection, now: Instant) {
        let position = detection.bounding_box.centroid();
        self.previous_position = Some(self.position);
        self.position = position;
        self.bounding_box = detection.bounding_box;
        self.confidence = detection.confidence;
        self.last_seen = now;
        self.hits = self.hits.saturating_add(1);
    }

    /// Time since the entity was last matched
    #[inline]
    pub fn unseen_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    /// Time since the entity was first created
    #[inline]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.first_seen)
    }
}

/// Direction of a counted boundary crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossingDirection {
    Entry,
    Exit,
}

impl CrossingDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrossingDirection::Entry => "entry",
            CrossingDirection::Exit => "exit",
        }
    }
}

/// Coarse on-screen heading of a movement (image y grows downwards)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Heading {
    Up,
    Down,
    Left,
    Right,
}

impl Heading {
    /// Quantize the motion from `from` to `to` into one of four 90-degree sectors
    pub fn from_motion(from: Point, to: Point) -> Self {
        let angle = (to.y - from.y).atan2(to.x - from.x).to_degrees();
        if (-45.0..45.0).contains(&angle) {
            Heading::Right
        } else if (45.0..135.0).contains(&angle) {
            Heading::Down
        } else if (-135.0..-45.0).contains(&angle) {
            Heading::Up
        } else {
            Heading::Left
        }
    }
}

/// A counted crossing of the configured line
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CrossingEvent {
    pub entity_id: EntityId,
    pub direction: CrossingDirection,
    pub heading: Heading,
    /// Centroid at the tick the crossing was counted
    pub position: Point,
}
