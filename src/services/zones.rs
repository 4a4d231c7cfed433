//! Zone occupancy and density

use crate::domain::geometry::Zone;
use crate::domain::snapshot::ZoneStat;
use crate::domain::types::Point;

/// Per-tick zone breakdown
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneAnalysis {
    /// One entry per zone, declaration order
    pub stats: Vec<ZoneStat>,
    pub busiest: Option<String>,
    pub quietest: Option<String>,
    /// Points that fell inside at least one zone
    pub in_any_zone: u32,
}

pub struct ZoneAnalyzer {
    zones: Vec<Zone>,
    frame_width: f64,
    frame_height: f64,
}

impl ZoneAnalyzer {
    pub fn new(zones: Vec<Zone>, frame_width: u32, frame_height: u32) -> Self {
        Self { zones, frame_width: frame_width as f64, frame_height: frame_height as f64 }
    }

    /// Pixel point to 0-100 frame coordinates
    #[inline]
    pub fn normalize(&self, p: Point) -> Point {
        Point::new(p.x / self.frame_width * 100.0, p.y / self.frame_height * 100.0)
    }

    /// Count pixel-space centroids per zone. Overlapping zones each count a point.
    pub fn analyze<I>(&self, centroids: I) -> ZoneAnalysis
    where
        I: IntoIterator<Item = Point>,
    {
        let mut counts = vec![0u32; self.zones.len()];
        let mut in_any_zone = 0u32;

        for centroid in centroids {
            let p = self.normalize(centroid);
            let mut hit = false;
            for (i, zone) in self.zones.iter().enumerate() {
                if zone.region.contains(p) {
                    counts[i] += 1;
                    hit = true;
                }
            }
            if hit {
                in_any_zone += 1;
            }
        }

        let stats: Vec<ZoneStat> = self
            .zones
            .iter()
            .zip(&counts)
            .map(|(zone, &count)| ZoneStat {
                name: zone.name.clone(),
                count,
                density: zone_density(count, zone.region.area()),
            })
            .collect();

        // Strict comparisons keep the earliest declared zone on ties
        let mut busiest: Option<&ZoneStat> = None;
        let mut quietest: Option<&ZoneStat> = None;
        for stat in &stats {
            if busiest.map_or(true, |b| stat.count > b.count) {
                busiest = Some(stat);
            }
            if quietest.map_or(true, |q| stat.count < q.count) {
                quietest = Some(stat);
            }
        }

        ZoneAnalysis {
            busiest: busiest.map(|s| s.name.clone()),
            quietest: quietest.map(|s| s.name.clone()),
            stats,
            in_any_zone,
        }
    }
}

/// `min(100, count / (area / 100) * 100)` with area in normalized units
pub fn zone_density(count: u32, area: f64) -> f64 {
    if area <= 0.0 {
        return 0.0;
    }
    (count as f64 / (area / 100.0) * 100.0).min(100.0)
}
