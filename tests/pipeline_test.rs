//! End-to-end tests: recorded detections through a full analysis session

use crowd_flow::domain::snapshot::{AnalyticsSnapshot, ConnectionState, DensityLevel};
use crowd_flow::infra::Config;
use crowd_flow::io::ReplayReader;
use crowd_flow::services::{AnalysisSession, TickInput};
use std::time::{Duration, Instant};

const CONFIG: &str = r#"
[tracker]
ttl_ms = 10000

[line]
x1 = 0.0
y1 = 240.0
x2 = 640.0
y2 = 240.0
entry_transition = "negative_to_positive"
cooldown_ms = 3000

[[zones]]
name = "left"
rect = [0.0, 0.0, 50.0, 100.0]

[[zones]]
name = "right"
rect = [50.0, 0.0, 50.0, 100.0]

[density]
capacity = 50
"#;

fn replay(config: &str, recording: &str) -> Vec<AnalyticsSnapshot> {
    let config = Config::from_toml_str(config).unwrap();
    let mut session = AnalysisSession::new(&config).unwrap();
    let base = Instant::now();

    ReplayReader::new(recording.as_bytes())
        .map(|frame| {
            let frame = frame.unwrap();
            session
                .tick(TickInput {
                    now: base + Duration::from_millis(frame.ts_ms),
                    timestamp_ms: frame.ts_ms,
                    detections: frame.detections,
                    connection: ConnectionState::Connected,
                })
                .snapshot
        })
        .collect()
}

fn person(x: f64, y: f64) -> String {
    format!(r#"{{"class":"person","score":0.9,"bbox":[{x},{y},40,80]}}"#)
}

fn line(ts_ms: u64, people: &[(f64, f64)]) -> String {
    let detections: Vec<String> = people.iter().map(|&(x, y)| person(x, y)).collect();
    format!(r#"{{"ts_ms":{ts_ms},"detections":[{}]}}"#, detections.join(","))
}

#[test]
fn test_walk_in_and_out() {
    // Centroid y: 150 -> 290 (entry) -> 310 -> 170 (exit, after cooldown)
    let recording = [
        line(0, &[(100.0, 110.0)]),
        line(5000, &[(100.0, 250.0)]),
        line(10000, &[(100.0, 270.0)]),
        line(15000, &[(100.0, 130.0)]),
    ]
    .join("\n");

    let snapshots = replay(CONFIG, &recording);

    assert_eq!(snapshots.len(), 4);
    assert_eq!(snapshots[1].cumulative_entries, 1);
    assert_eq!(snapshots[3].cumulative_entries, 1);
    assert_eq!(snapshots[3].cumulative_exits, 1);
    assert_eq!(snapshots[3].net_flow, 0);
    assert_eq!(snapshots[3].tick, 4);
    assert!(snapshots.iter().all(|s| s.current_occupancy == 1));
}

#[test]
fn test_jitter_across_line_counts_once() {
    // Centroid oscillates 230 <-> 250 around the line every second, inside the cooldown
    let recording = (0..4)
        .map(|i| {
            let y = if i % 2 == 0 { 190.0 } else { 210.0 };
            line(i * 1000, &[(300.0, y)])
        })
        .collect::<Vec<_>>()
        .join("\n");

    let snapshots = replay(CONFIG, &recording);
    let last = snapshots.last().unwrap();

    assert_eq!(last.cumulative_entries, 1);
    assert_eq!(last.cumulative_exits, 0);
}

#[test]
fn test_zones_density_and_peak() {
    let crowd: Vec<(f64, f64)> =
        (0..30).map(|i| (10.0 + (i % 10) as f64 * 20.0, 10.0 + (i / 10) as f64 * 100.0)).collect();
    let recording = [line(0, &crowd), line(5000, &crowd[..5])].join("\n");

    let snapshots = replay(CONFIG, &recording);

    let busy = &snapshots[0];
    assert_eq!(busy.current_occupancy, 30);
    assert_eq!(busy.occupancy_percent, 60.0);
    assert_eq!(busy.density_level, DensityLevel::High);
    assert_eq!(busy.busiest_zone.as_deref(), Some("left"));
    assert_eq!(busy.quietest_zone.as_deref(), Some("right"));

    let quiet = &snapshots[1];
    assert_eq!(quiet.current_occupancy, 5);
    assert_eq!(quiet.peak_occupancy, 30);
    assert_eq!(quiet.density_level, DensityLevel::Low);
}

#[test]
fn test_dwell_reported_after_eviction() {
    // Seen until 4s, evicted at 15s once unseen for longer than the 10s ttl
    let recording = [
        line(0, &[(100.0, 100.0)]),
        line(4000, &[(105.0, 100.0)]),
        r#"{"ts_ms":9000,"detections":[]}"#.to_string(),
        r#"{"ts_ms":15000,"detections":[]}"#.to_string(),
    ]
    .join("\n");

    let snapshots = replay(CONFIG, &recording);

    assert!(snapshots[2].average_dwell_secs.is_none());
    assert_eq!(snapshots[2].tracked_entities, 1);
    assert_eq!(snapshots[3].tracked_entities, 0);
    // Age at eviction includes the unseen tail
    assert_eq!(snapshots[3].average_dwell_secs, Some(15.0));
}

#[test]
fn test_failed_detection_keeps_counters() {
    let recording = [
        line(0, &[(100.0, 110.0)]),
        line(5000, &[(100.0, 250.0)]),
        r#"{"ts_ms":10000,"detections":null}"#.to_string(),
    ]
    .join("\n");

    let snapshots = replay(CONFIG, &recording);
    let failed = &snapshots[2];

    assert!(!failed.detector_ok);
    assert_eq!(failed.current_occupancy, 0);
    assert_eq!(failed.cumulative_entries, 1);
    assert_eq!(failed.tracked_entities, 1);
}
