//! Crossing line and zone regions

use super::types::{CrossingDirection, Point};
use serde::{Deserialize, Serialize};

/// Perpendicular distance (pixels) under which a point is treated as lying on the line
const ON_LINE_EPSILON: f64 = 1e-9;

/// Which half-plane of a crossing line a point lies in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSide {
    Positive,
    Negative,
    On,
}

/// Which sign flip counts as an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryTransition {
    NegativeToPositive,
    PositiveToNegative,
}

impl EntryTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryTransition::NegativeToPositive => "negative_to_positive",
            EntryTransition::PositiveToNegative => "positive_to_negative",
        }
    }
}

/// Virtual boundary in frame pixel space, directed from `start` to `end`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossingLine {
    pub start: Point,
    pub end: Point,
    pub entry_transition: EntryTransition,
}

impl CrossingLine {
    pub fn new(start: Point, end: Point, entry_transition: EntryTransition) -> Self {
        Self { start, end, entry_transition }
    }

    #[inline]
    pub fn length(&self) -> f64 {
        self.start.distance(&self.end)
    }

    /// Side of `p` from the sign of cross(end - start, p - start)
    ///
    /// For a left-to-right horizontal line in image coordinates, points below
    /// the line (larger y) are `Positive`.
    pub fn side_of(&self, p: Point) -> LineSide {
        let dx = self.end.x - self.start.x;
        let dy = self.end.y - self.start.y;
        let cross = dx * (p.y - self.start.y) - dy * (p.x - self.start.x);
        let len = self.length();
        if !cross.is_finite() || len == 0.0 || (cross / len).abs() <= ON_LINE_EPSILON {
            return LineSide::On;
        }
        if cross > 0.0 {
            LineSide::Positive
        } else {
            LineSide::Negative
        }
    }

    /// Direction of a strict side flip between two positions, if any
    pub fn classify(&self, from: Point, to: Point) -> Option<CrossingDirection> {
        self.direction(self.side_of(from), self.side_of(to))
    }

    /// Direction of a flip between two sides. `On` never flips.
    pub fn direction(&self, from: LineSide, to: LineSide) -> Option<CrossingDirection> {
        let transition = match (from, to) {
            (LineSide::Negative, LineSide::Positive) => EntryTransition::NegativeToPositive,
            (LineSide::Positive, LineSide::Negative) => EntryTransition::PositiveToNegative,
            _ => return None,
        };
        if transition == self.entry_transition {
            Some(CrossingDirection::Entry)
        } else {
            Some(CrossingDirection::Exit)
        }
    }
}

/// Zone shape in normalized 0-100 frame coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Region {
    Rect { x: f64, y: f64, width: f64, height: f64 },
    Polygon { points: Vec<Point> },
}

impl Region {
    /// Rectangles include their edges; polygons use even-odd ray casting
    pub fn contains(&self, p: Point) -> bool {
        match self {
            Region::Rect { x, y, width, height } => {
                p.x >= *x && p.x <= x + width && p.y >= *y && p.y <= y + height
            }
            Region::Polygon { points } => {
                let n = points.len();
                if n < 3 {
                    return false;
                }
                let mut inside = false;
                let mut j = n - 1;
                for i in 0..n {
                    let (pi, pj) = (points[i], points[j]);
                    if (pi.y > p.y) != (pj.y > p.y)
                        && p.x < (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x
                    {
                        inside = !inside;
                    }
                    j = i;
                }
                inside
            }
        }
    }

    /// Area in normalized units (shoelace formula for polygons)
    pub fn area(&self) -> f64 {
        match self {
            Region::Rect { width, height, .. } => width * height,
            Region::Polygon { points } => {
                let n = points.len();
                if n < 3 {
                    return 0.0;
                }
                let mut twice = 0.0;
                for i in 0..n {
                    let a = points[i];
                    let b = points[(i + 1) % n];
                    twice += a.x * b.y - b.x * a.y;
                }
                (twice / 2.0).abs()
            }
        }
    }

    /// All vertices (or corners) lie within the 0-100 frame
    pub fn within_frame(&self) -> bool {
        let in_range = |v: f64| v.is_finite() && (0.0..=100.0).contains(&v);
        match self {
            Region::Rect { x, y, width, height } => {
                in_range(*x) && in_range(*y) && in_range(x + width) && in_range(y + height)
            }
            Region::Polygon { points } => points.iter().all(|p| in_range(p.x) && in_range(p.y)),
        }
    }
}

/// Named region of interest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub region: Region,
}

impl Zone {
    pub fn new(name: impl Into<String>, region: Region) -> Self {
        Self { name: name.into(), region }
    }
}
