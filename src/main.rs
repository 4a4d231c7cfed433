//! Crowd flow daemon
//!
//! Polls a network camera, runs detections through the analysis session on
//! a fixed tick and publishes occupancy and flow snapshots.
//!
//! Module structure:
//! - `domain/` - Core types (detections, entities, geometry, snapshots)
//! - `io/` - External interfaces (camera, detector, MQTT, HTTP)
//! - `services/` - Tracker, crossings, zones, aggregator, supervisor, scheduler
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use crowd_flow::infra::{Config, Metrics};
use crowd_flow::io::prometheus::{start_metrics_server, OperatorControls, ServerState};
use crowd_flow::io::{create_egress_channel, HttpCamera, HttpDetector, MqttPublisher};
use crowd_flow::services::{
    create_scheduler, create_supervisor, AnalysisSession, SchedulerSettings, SnapshotBus,
    SupervisorSettings,
};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Crowd flow - occupancy and flow analytics from a network camera
#[derive(Parser, Debug)]
#[command(name = "crowd-flow", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging() {
    // RUST_LOG controls the level, LOG_FORMAT=json switches to JSON lines
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);

    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    info!("crowd-flow starting");

    let args = Args::parse();
    let config_path = Config::resolve_config_path(args.config.as_deref());
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        camera = %config.camera_url(),
        detector = %config.detector_url(),
        frame = %format!("{}x{}", config.frame_width(), config.frame_height()),
        tick_ms = %config.tick_interval().as_millis(),
        capacity = %config.capacity(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    // Refuse to run a session against an invalid configuration
    let session = match AnalysisSession::new(&config) {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "config_invalid");
            return ExitCode::FAILURE;
        }
    };

    let camera = match HttpCamera::new(&config) {
        Ok(camera) => Arc::new(camera),
        Err(e) => {
            error!(error = %e, "camera_client_init_failed");
            return ExitCode::FAILURE;
        }
    };
    let detector = match HttpDetector::new(&config) {
        Ok(detector) => Arc::new(detector),
        Err(e) => {
            error!(error = %e, "detector_client_init_failed");
            return ExitCode::FAILURE;
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());
    let bus = SnapshotBus::new(64);

    // MQTT egress (if enabled)
    let egress_sender = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) = create_egress_channel(1000, config.site_id().to_string());
        let publisher = MqttPublisher::new(&config, egress_rx);
        tokio::spawn(publisher.run(shutdown_rx.clone()));
        Some(egress_sender.with_metrics(metrics.clone()))
    } else {
        None
    };

    let (supervisor, supervisor_handle) = create_supervisor(
        SupervisorSettings::from_config(&config),
        camera.clone(),
        metrics.clone(),
        egress_sender.clone(),
    );
    let supervisor_task = tokio::spawn(supervisor.run(shutdown_rx.clone()));

    let (scheduler, scheduler_handle) = create_scheduler(
        session,
        SchedulerSettings::from_config(&config),
        camera,
        detector,
        supervisor_handle.clone(),
        bus.clone(),
        egress_sender,
        metrics.clone(),
    );

    // Prometheus, snapshot and operator HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let state = ServerState {
            metrics: metrics.clone(),
            site_id: Arc::new(config.site_id().to_string()),
            bus,
            controls: OperatorControls {
                scheduler: scheduler_handle,
                supervisor: supervisor_handle,
            },
        };
        let server = start_metrics_server(prometheus_port, state, shutdown_rx.clone());
        tokio::spawn(async move {
            if let Err(e) = server.await {
                error!(error = %e, "metrics_server_error");
            }
        });
    }

    // Periodic metrics log
    let metrics_reporter = metrics;
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_reporter.report().log();
        }
    });

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await;
    let _ = supervisor_task.await;

    info!("crowd-flow shutdown complete");
    ExitCode::SUCCESS
}
