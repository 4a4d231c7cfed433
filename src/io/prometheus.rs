//! HTTP endpoint: Prometheus metrics, the latest snapshot and operator commands
//!
//! - `GET /metrics`       - Prometheus text exposition
//! - `GET /health`        - liveness and camera connection state
//! - `GET /snapshot`      - latest analytics snapshot as JSON
//! - `POST /reset`        - zero entries, exits, peak and dwell
//! - `POST /camera/reset` - restart camera reconnection after it gave up

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::services::aggregator::SnapshotBus;
use crate::services::scheduler::SchedulerHandle;
use crate::services::supervisor::SupervisorHandle;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {}", avg * count);
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_tick_metrics(&mut output, site, &summary);
    write_detector_metrics(&mut output, site, &summary);
    write_flow_metrics(&mut output, site, &summary);
    write_connection_metrics(&mut output, site, &summary);

    output
}

fn write_tick_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "crowd_ticks_total",
        "Total analysis ticks completed",
        MetricType::Counter,
        site,
        summary.ticks_total,
    );
    write_metric(
        output,
        "crowd_ticks_skipped_total",
        "Ticks skipped while a detection was in flight",
        MetricType::Counter,
        site,
        summary.ticks_skipped,
    );
    write_histogram(
        output,
        "crowd_tick_latency_us",
        "Tick latency from frame request to snapshot in microseconds",
        site,
        &summary.tick_lat_buckets,
        summary.avg_tick_latency_us,
    );
}

fn write_detector_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "crowd_detector_calls_total",
        "Detector requests issued",
        MetricType::Counter,
        site,
        summary.detector_calls,
    );
    write_metric(
        output,
        "crowd_detector_failures_total",
        "Detector requests that failed or timed out",
        MetricType::Counter,
        site,
        summary.detector_failures,
    );
    write_histogram(
        output,
        "crowd_detector_latency_ms",
        "Detector round-trip in milliseconds",
        site,
        &summary.detector_lat_buckets,
        summary.detector_avg_ms,
    );
    write_metric(
        output,
        "crowd_detections_rejected_total",
        "Detections dropped as implausible",
        MetricType::Counter,
        site,
        summary.detections_rejected,
    );
    write_metric(
        output,
        "crowd_detections_ignored_total",
        "Person detections below the confidence floor",
        MetricType::Counter,
        site,
        summary.detections_ignored,
    );
}

fn write_flow_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "crowd_occupancy",
        "People detected in the latest tick",
        MetricType::Gauge,
        site,
        summary.occupancy,
    );
    write_metric(
        output,
        "crowd_tracked_entities",
        "Entities currently tracked, including coasting ones",
        MetricType::Gauge,
        site,
        summary.tracked_entities,
    );
    write_metric(
        output,
        "crowd_entries_total",
        "Counted line crossings in the entry direction",
        MetricType::Counter,
        site,
        summary.entries_total,
    );
    write_metric(
        output,
        "crowd_exits_total",
        "Counted line crossings in the exit direction",
        MetricType::Counter,
        site,
        summary.exits_total,
    );
    write_metric(
        output,
        "crowd_crossings_suppressed_total",
        "Crossings suppressed by the per-entity cooldown",
        MetricType::Counter,
        site,
        summary.crossings_suppressed,
    );
    write_metric(
        output,
        "crowd_entities_created_total",
        "Entities created",
        MetricType::Counter,
        site,
        summary.entities_created,
    );
    write_metric(
        output,
        "crowd_entities_evicted_total",
        "Entities evicted after going unseen",
        MetricType::Counter,
        site,
        summary.entities_evicted,
    );
}

fn write_connection_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "crowd_camera_state",
        "Camera connection (0=disconnected, 1=connecting, 2=connected, 3=reconnecting)",
        MetricType::Gauge,
        site,
        summary.connection_state,
    );
    write_metric(
        output,
        "crowd_camera_probe_failures_total",
        "Failed camera probes and frame fetches",
        MetricType::Counter,
        site,
        summary.probe_failures,
    );
    write_metric(
        output,
        "crowd_camera_reconnect_attempts_total",
        "Reconnect attempts scheduled",
        MetricType::Counter,
        site,
        summary.reconnect_attempts,
    );
    write_metric(
        output,
        "crowd_egress_dropped_total",
        "Egress messages dropped on a full queue",
        MetricType::Counter,
        site,
        summary.egress_dropped,
    );
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn health_body(metrics: &Metrics) -> String {
    let state = match metrics.connection_state() {
        1 => "connecting",
        2 => "connected",
        3 => "reconnecting",
        _ => "disconnected",
    };
    format!(r#"{{"ok":true,"camera":"{state}"}}"#)
}

/// Handles for the commands an operator can issue over HTTP
#[derive(Clone)]
pub struct OperatorControls {
    pub scheduler: SchedulerHandle,
    pub supervisor: SupervisorHandle,
}

/// Everything a request handler needs
#[derive(Clone)]
pub struct ServerState {
    pub metrics: Arc<Metrics>,
    pub site_id: Arc<String>,
    pub bus: SnapshotBus,
    pub controls: OperatorControls,
}

async fn route(method: &Method, path: &str, state: &ServerState) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/metrics") => respond(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&state.metrics, &state.site_id),
        ),
        (&Method::GET, "/health") => {
            respond(StatusCode::OK, "application/json", health_body(&state.metrics))
        }
        (&Method::POST, "/reset") => {
            info!("operator_reset_counters");
            state.controls.scheduler.reset_counters().await;
            respond(StatusCode::ACCEPTED, "application/json", r#"{"ok":true,"reset":"counters"}"#)
        }
        (&Method::POST, "/camera/reset") => {
            info!("operator_reset_camera");
            state.controls.supervisor.reset().await;
            respond(StatusCode::ACCEPTED, "application/json", r#"{"ok":true,"reset":"camera"}"#)
        }
        (&Method::GET, "/snapshot") => match state.bus.latest() {
            Some(snapshot) => match serde_json::to_vec(snapshot.as_ref()) {
                Ok(json) => respond(StatusCode::OK, "application/json", json),
                Err(e) => {
                    error!(error = %e, "snapshot_encode_failed");
                    respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "encode failed")
                }
            },
            None => respond(
                StatusCode::SERVICE_UNAVAILABLE,
                "application/json",
                r#"{"error":"no_snapshot_yet"}"#,
            ),
        },
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: ServerState,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(route(req.method(), req.uri().path(), &state).await)
}

/// Start the metrics, snapshot and operator HTTP server
pub async fn start_metrics_server(
    port: u16,
    state: ServerState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, site = %state.site_id, "metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| handle_request(req, state.clone()));

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "metrics_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "metrics_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
