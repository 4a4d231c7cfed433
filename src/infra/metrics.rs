//! Lock-free metrics collection and periodic reporting
//!
//! Counter updates are lock-free atomics. `report()` swaps the periodic
//! counters to zero; monotonic totals are only ever loaded.
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical counters only
//! and must not be used for coordination.

use crate::domain::snapshot::ConnectionState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a value using binary search
#[inline]
fn bucket_index(value: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < value)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector shared by the scheduler, supervisor and egress
pub struct Metrics {
    /// Total ticks processed (monotonic)
    ticks_total: AtomicU64,
    /// Ticks since last report (reset on report)
    ticks_since_report: AtomicU64,
    /// Interval ticks dropped while detection was in flight (monotonic)
    ticks_skipped: AtomicU64,
    /// Sum of tick pipeline latencies in microseconds (reset on report)
    tick_latency_sum_us: AtomicU64,
    /// Max tick pipeline latency in microseconds (reset on report)
    tick_latency_max_us: AtomicU64,
    /// Tick pipeline latency histogram, µs (reset on report)
    tick_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Detector round-trip histogram, ms (reset on report)
    detector_latency_buckets: [AtomicU64; NUM_BUCKETS],
    detector_latency_sum_ms: AtomicU64,
    detector_calls: AtomicU64,
    detector_failures: AtomicU64,
    /// Detections refused for implausible geometry or score
    detections_rejected: AtomicU64,
    /// Detections below the confidence floor
    detections_ignored: AtomicU64,
    entries_total: AtomicU64,
    exits_total: AtomicU64,
    crossings_suppressed: AtomicU64,
    entities_created: AtomicU64,
    entities_evicted: AtomicU64,
    probe_failures: AtomicU64,
    reconnect_attempts: AtomicU64,
    /// Egress messages dropped due to channel full (monotonic)
    egress_dropped: AtomicU64,
    /// Current connection state (see `ConnectionState::gauge_value`)
    connection_state: AtomicU64,
    /// Persons detected in the latest tick
    occupancy: AtomicU64,
    /// Entities held by the tracker after the latest tick
    tracked_entities: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ticks_total: AtomicU64::new(0),
            ticks_since_report: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
            tick_latency_sum_us: AtomicU64::new(0),
            tick_latency_max_us: AtomicU64::new(0),
            tick_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            detector_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            detector_latency_sum_ms: AtomicU64::new(0),
            detector_calls: AtomicU64::new(0),
            detector_failures: AtomicU64::new(0),
            detections_rejected: AtomicU64::new(0),
            detections_ignored: AtomicU64::new(0),
            entries_total: AtomicU64::new(0),
            exits_total: AtomicU64::new(0),
            crossings_suppressed: AtomicU64::new(0),
            entities_created: AtomicU64::new(0),
            entities_evicted: AtomicU64::new(0),
            probe_failures: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            egress_dropped: AtomicU64::new(0),
            connection_state: AtomicU64::new(0),
            occupancy: AtomicU64::new(0),
            tracked_entities: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record one completed tick (lock-free)
    #[inline]
    pub fn record_tick(&self, latency_us: u64) {
        self.ticks_total.fetch_add(1, Ordering::Relaxed);
        self.ticks_since_report.fetch_add(1, Ordering::Relaxed);
        self.tick_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.tick_latency_max_us, latency_us);
        self.tick_latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_tick_skipped(&self) {
        self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a detector round trip, successful or not
    #[inline]
    pub fn record_detector_call(&self, latency_ms: u64, ok: bool) {
        self.detector_calls.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.detector_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.detector_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.detector_latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_detections_filtered(&self, rejected: u64, ignored: u64) {
        self.detections_rejected.fetch_add(rejected, Ordering::Relaxed);
        self.detections_ignored.fetch_add(ignored, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_crossings(&self, entries: u64, exits: u64, suppressed: u64) {
        self.entries_total.fetch_add(entries, Ordering::Relaxed);
        self.exits_total.fetch_add(exits, Ordering::Relaxed);
        self.crossings_suppressed.fetch_add(suppressed, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_entities(&self, created: u64, evicted: u64) {
        self.entities_created.fetch_add(created, Ordering::Relaxed);
        self.entities_evicted.fetch_add(evicted, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_probe_failure(&self) {
        self.probe_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_egress_dropped(&self) {
        self.egress_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_connection_state(&self, state: &ConnectionState) {
        self.connection_state.store(state.gauge_value(), Ordering::Relaxed);
    }

    #[inline]
    pub fn set_occupancy(&self, occupancy: u64, tracked_entities: u64) {
        self.occupancy.store(occupancy, Ordering::Relaxed);
        self.tracked_entities.store(tracked_entities, Ordering::Relaxed);
    }

    pub fn ticks_total(&self) -> u64 {
        self.ticks_total.load(Ordering::Relaxed)
    }

    pub fn ticks_skipped(&self) -> u64 {
        self.ticks_skipped.load(Ordering::Relaxed)
    }

    pub fn detector_calls(&self) -> u64 {
        self.detector_calls.load(Ordering::Relaxed)
    }

    pub fn detector_failures(&self) -> u64 {
        self.detector_failures.load(Ordering::Relaxed)
    }

    pub fn detections_rejected(&self) -> u64 {
        self.detections_rejected.load(Ordering::Relaxed)
    }

    pub fn detections_ignored(&self) -> u64 {
        self.detections_ignored.load(Ordering::Relaxed)
    }

    pub fn entries_total(&self) -> u64 {
        self.entries_total.load(Ordering::Relaxed)
    }

    pub fn exits_total(&self) -> u64 {
        self.exits_total.load(Ordering::Relaxed)
    }

    pub fn crossings_suppressed(&self) -> u64 {
        self.crossings_suppressed.load(Ordering::Relaxed)
    }

    pub fn entities_created(&self) -> u64 {
        self.entities_created.load(Ordering::Relaxed)
    }

    pub fn entities_evicted(&self) -> u64 {
        self.entities_evicted.load(Ordering::Relaxed)
    }

    pub fn probe_failures(&self) -> u64 {
        self.probe_failures.load(Ordering::Relaxed)
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    pub fn egress_dropped(&self) -> u64 {
        self.egress_dropped.load(Ordering::Relaxed)
    }

    pub fn connection_state(&self) -> u64 {
        self.connection_state.load(Ordering::Relaxed)
    }

    pub fn occupancy(&self) -> u64 {
        self.occupancy.load(Ordering::Relaxed)
    }

    pub fn tracked_entities(&self) -> u64 {
        self.tracked_entities.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    pub fn report(&self) -> MetricsSummary {
        let tick_count = self.ticks_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.tick_latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.tick_latency_max_us.swap(0, Ordering::Relaxed);
        let tick_lat_buckets = swap_buckets(&self.tick_latency_buckets);

        let detector_lat_buckets = swap_buckets(&self.detector_latency_buckets);
        let detector_lat_sum = self.detector_latency_sum_ms.swap(0, Ordering::Relaxed);
        let detector_count: u64 = detector_lat_buckets.iter().sum();

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let ticks_per_min = if elapsed.as_secs_f64() > 0.0 {
            tick_count as f64 * 60.0 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let avg_tick_latency = if tick_count > 0 { latency_sum / tick_count } else { 0 };
        let detector_avg_ms = if detector_count > 0 { detector_lat_sum / detector_count } else { 0 };

        MetricsSummary {
            ticks_total: self.ticks_total(),
            ticks_per_min,
            ticks_skipped: self.ticks_skipped(),
            avg_tick_latency_us: avg_tick_latency,
            max_tick_latency_us: max_latency,
            tick_lat_p50_us: percentile_from_buckets(&tick_lat_buckets, 0.50),
            tick_lat_p99_us: percentile_from_buckets(&tick_lat_buckets, 0.99),
            tick_lat_buckets,
            detector_calls: self.detector_calls(),
            detector_failures: self.detector_failures(),
            detector_avg_ms,
            detector_p99_ms: percentile_from_buckets(&detector_lat_buckets, 0.99),
            detector_lat_buckets,
            detections_rejected: self.detections_rejected(),
            detections_ignored: self.detections_ignored(),
            entries_total: self.entries_total(),
            exits_total: self.exits_total(),
            crossings_suppressed: self.crossings_suppressed(),
            entities_created: self.entities_created(),
            entities_evicted: self.entities_evicted(),
            probe_failures: self.probe_failures(),
            reconnect_attempts: self.reconnect_attempts(),
            egress_dropped: self.egress_dropped(),
            connection_state: self.connection_state(),
            occupancy: self.occupancy(),
            tracked_entities: self.tracked_entities(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub ticks_total: u64,
    pub ticks_per_min: f64,
    pub ticks_skipped: u64,
    pub avg_tick_latency_us: u64,
    pub max_tick_latency_us: u64,
    pub tick_lat_p50_us: u64,
    pub tick_lat_p99_us: u64,
    /// Tick pipeline latency histogram buckets (µs)
    pub tick_lat_buckets: [u64; NUM_BUCKETS],
    pub detector_calls: u64,
    pub detector_failures: u64,
    pub detector_avg_ms: u64,
    pub detector_p99_ms: u64,
    /// Detector round-trip histogram buckets (ms)
    pub detector_lat_buckets: [u64; NUM_BUCKETS],
    pub detections_rejected: u64,
    pub detections_ignored: u64,
    pub entries_total: u64,
    pub exits_total: u64,
    pub crossings_suppressed: u64,
    pub entities_created: u64,
    pub entities_evicted: u64,
    pub probe_failures: u64,
    pub reconnect_attempts: u64,
    pub egress_dropped: u64,
    pub connection_state: u64,
    pub occupancy: u64,
    pub tracked_entities: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            ticks_total = %self.ticks_total,
            ticks_per_min = format!("{:.1}", self.ticks_per_min),
            ticks_skipped = %self.ticks_skipped,
            avg_tick_us = %self.avg_tick_latency_us,
            p99_tick_us = %self.tick_lat_p99_us,
            detector_avg_ms = %self.detector_avg_ms,
            detector_failures = %self.detector_failures,
            occupancy = %self.occupancy,
            tracked = %self.tracked_entities,
            entries = %self.entries_total,
            exits = %self.exits_total,
            connection = %self.connection_state,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::snapshot::DisconnectReason;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.ticks_total(), 0);
        assert_eq!(metrics.entries_total(), 0);
        assert_eq!(metrics.connection_state(), 0);
    }

    #[test]
    fn test_record_tick() {
        let metrics = Metrics::new();

        metrics.record_tick(100);
        assert_eq!(metrics.ticks_total(), 1);
        assert_eq!(metrics.tick_latency_sum_us.load(Ordering::Relaxed), 100);

        metrics.record_tick(200);
        assert_eq!(metrics.ticks_total(), 2);
        assert_eq!(metrics.tick_latency_sum_us.load(Ordering::Relaxed), 300);
    }

    #[test]
    fn test_report() {
        let metrics = Metrics::new();

        metrics.record_tick(100);
        metrics.record_tick(200);
        metrics.record_tick(300);
        metrics.record_crossings(2, 1, 1);
        metrics.record_detector_call(150, true);
        metrics.record_detector_call(450, false);

        let summary = metrics.report();

        assert_eq!(summary.ticks_total, 3);
        assert_eq!(summary.avg_tick_latency_us, 200);
        assert_eq!(summary.max_tick_latency_us, 300);
        assert_eq!(summary.entries_total, 2);
        assert_eq!(summary.exits_total, 1);
        assert_eq!(summary.crossings_suppressed, 1);
        assert_eq!(summary.detector_calls, 2);
        assert_eq!(summary.detector_failures, 1);
        assert_eq!(summary.detector_avg_ms, 300);

        // Periodic counters reset, totals kept
        assert_eq!(metrics.ticks_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.tick_latency_max_us.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.report().ticks_total, 3);
    }

    #[test]
    fn test_report_empty() {
        let summary = Metrics::new().report();
        assert_eq!(summary.ticks_total, 0);
        assert_eq!(summary.avg_tick_latency_us, 0);
        assert_eq!(summary.tick_lat_p99_us, 0);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10);
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();
        for _ in 0..100 {
            metrics.record_tick(150);
        }
        let summary = metrics.report();
        assert_eq!(summary.tick_lat_p50_us, 200);
        assert_eq!(summary.tick_lat_p99_us, 200);
    }

    #[test]
    fn test_gauges() {
        let metrics = Metrics::new();
        metrics.set_connection_state(&ConnectionState::Connected);
        metrics.set_occupancy(7, 9);
        assert_eq!(metrics.connection_state(), 2);
        assert_eq!(metrics.occupancy(), 7);
        assert_eq!(metrics.tracked_entities(), 9);

        metrics.set_connection_state(&ConnectionState::Disconnected {
            reason: DisconnectReason::Exhausted,
        });
        assert_eq!(metrics.connection_state(), 0);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    m.record_tick(i as u64);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.ticks_total(), 10_000);
    }
}
