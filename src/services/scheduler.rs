//! Tick scheduler
//!
//! Drives the analysis session on a fixed interval. Frame fetch and
//! detection run in a spawned task so a slow detector never blocks the
//! loop; a tick that fires while one is still in flight is skipped.

use crate::domain::snapshot::ConnectionState;
use crate::domain::types::{epoch_ms, CrossingDirection, Detection};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::camera::{CameraError, FrameSource};
use crate::io::detector::{DetectError, Detector};
use crate::io::EgressSender;
use crate::services::aggregator::SnapshotBus;
use crate::services::session::{AnalysisSession, TickInput, TickOutput};
use crate::services::supervisor::SupervisorHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    pub detector_timeout: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self { tick_interval: config.tick_interval(), detector_timeout: config.detector_timeout() }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { tick_interval: Duration::from_secs(5), detector_timeout: Duration::from_secs(4) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    ResetCounters,
}

#[derive(Clone)]
pub struct SchedulerHandle {
    cmd_tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub async fn reset_counters(&self) {
        let _ = self.cmd_tx.send(SchedulerCommand::ResetCounters).await;
    }

    /// Handle with no scheduler behind it, for tests that inspect the commands
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::Receiver<SchedulerCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        (Self { cmd_tx }, cmd_rx)
    }
}

/// Result of one frame fetch plus detection
enum FetchOutcome {
    Detected { detections: Vec<Detection>, detector_ms: u64 },
    FrameFailed(CameraError),
    DetectFailed { error: DetectError, detector_ms: u64 },
}

struct InFlight {
    started: Instant,
    timestamp_ms: u64,
    connection: ConnectionState,
    handle: JoinHandle<FetchOutcome>,
}

pub struct TickScheduler<S: FrameSource, D: Detector> {
    session: AnalysisSession,
    source: Arc<S>,
    detector: Arc<D>,
    supervisor: SupervisorHandle,
    bus: SnapshotBus,
    egress: Option<EgressSender>,
    metrics: Arc<Metrics>,
    settings: SchedulerSettings,
    cmd_rx: mpsc::Receiver<SchedulerCommand>,
}

/// Create a scheduler and its handle
#[allow(clippy::too_many_arguments)]
pub fn create_scheduler<S, D>(
    session: AnalysisSession,
    settings: SchedulerSettings,
    source: Arc<S>,
    detector: Arc<D>,
    supervisor: SupervisorHandle,
    bus: SnapshotBus,
    egress: Option<EgressSender>,
    metrics: Arc<Metrics>,
) -> (TickScheduler<S, D>, SchedulerHandle)
where
    S: FrameSource + 'static,
    D: Detector + 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let scheduler = TickScheduler {
        session,
        source,
        detector,
        supervisor,
        bus,
        egress,
        metrics,
        settings,
        cmd_rx,
    };
    (scheduler, SchedulerHandle { cmd_tx })
}

async fn join_in_flight(slot: &mut Option<InFlight>) -> Result<FetchOutcome, JoinError> {
    match slot {
        Some(job) => (&mut job.handle).await,
        None => std::future::pending().await,
    }
}

impl<S, D> TickScheduler<S, D>
where
    S: FrameSource + 'static,
    D: Detector + 'static,
{
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<InFlight> = None;

        info!(
            session_id = %self.session.session_id(),
            interval_ms = %self.settings.tick_interval.as_millis(),
            "scheduler_started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if in_flight.is_some() {
                        self.metrics.record_tick_skipped();
                        debug!("tick_skipped_detection_in_flight");
                        continue;
                    }
                    let connection = self.supervisor.state();
                    let started = Instant::now();
                    let timestamp_ms = epoch_ms();
                    if connection.is_connected() {
                        let handle = self.spawn_fetch();
                        in_flight = Some(InFlight { started, timestamp_ms, connection, handle });
                    } else {
                        self.run_tick(started, timestamp_ms, None, connection);
                    }
                }
                joined = join_in_flight(&mut in_flight) => {
                    let Some(job) = in_flight.take() else { continue };
                    let detections = match joined {
                        Ok(outcome) => self.handle_outcome(outcome),
                        Err(e) => {
                            warn!(error = %e, "detection_task_failed");
                            None
                        }
                    };
                    self.run_tick(job.started, job.timestamp_ms, detections, job.connection);
                }
                Some(cmd) = self.cmd_rx.recv() => {
                    match cmd {
                        SchedulerCommand::ResetCounters => {
                            self.session.reset_counters();
                            info!("counters_reset");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Some(job) = in_flight.take() {
            job.handle.abort();
            debug!("in_flight_detection_abandoned");
        }
        info!("scheduler_shutdown");
    }

    fn spawn_fetch(&self) -> JoinHandle<FetchOutcome> {
        let source = Arc::clone(&self.source);
        let detector = Arc::clone(&self.detector);
        let timeout = self.settings.detector_timeout;

        tokio::spawn(async move {
            let frame = match source.latest_frame().await {
                Ok(frame) => frame,
                Err(e) => return FetchOutcome::FrameFailed(e),
            };
            let started = Instant::now();
            let result = tokio::time::timeout(timeout, detector.detect(&frame))
                .await
                .unwrap_or(Err(DetectError::Timeout));
            let detector_ms = started.elapsed().as_millis() as u64;
            match result {
                Ok(detections) => FetchOutcome::Detected { detections, detector_ms },
                Err(error) => FetchOutcome::DetectFailed { error, detector_ms },
            }
        })
    }

    fn handle_outcome(&self, outcome: FetchOutcome) -> Option<Vec<Detection>> {
        match outcome {
            FetchOutcome::Detected { detections, detector_ms } => {
                self.metrics.record_detector_call(detector_ms, true);
                Some(detections)
            }
            FetchOutcome::FrameFailed(e) => {
                warn!(error = %e, "frame_fetch_failed");
                self.supervisor.report_frame_error(e.to_string());
                None
            }
            FetchOutcome::DetectFailed { error, detector_ms } => {
                self.metrics.record_detector_call(detector_ms, false);
                warn!(error = %error, "detection_failed");
                None
            }
        }
    }

    fn run_tick(
        &mut self,
        started: Instant,
        timestamp_ms: u64,
        detections: Option<Vec<Detection>>,
        connection: ConnectionState,
    ) {
        let output = self.session.tick(TickInput {
            now: started.into_std(),
            timestamp_ms,
            detections,
            connection,
        });
        self.metrics.record_tick(started.elapsed().as_micros() as u64);
        self.publish(output);
    }

    fn publish(&self, output: TickOutput) {
        let TickOutput { snapshot, crossings, stats } = output;

        self.metrics.record_detections_filtered(stats.rejected as u64, stats.ignored as u64);
        self.metrics.record_entities(stats.created as u64, stats.evicted as u64);
        let entries = crossings.iter().filter(|c| c.direction == CrossingDirection::Entry).count() as u64;
        self.metrics.record_crossings(
            entries,
            crossings.len() as u64 - entries,
            stats.suppressed as u64,
        );
        self.metrics
            .set_occupancy(snapshot.current_occupancy as u64, snapshot.tracked_entities as u64);

        debug!(
            tick = %snapshot.tick,
            occupancy = %snapshot.current_occupancy,
            tracked = %snapshot.tracked_entities,
            entries = %snapshot.cumulative_entries,
            exits = %snapshot.cumulative_exits,
            density = snapshot.density_level.as_str(),
            "tick_completed"
        );

        if let Some(egress) = &self.egress {
            for event in &crossings {
                egress.send_crossing(event);
            }
            egress.send_snapshot(&snapshot);
        }
        self.bus.publish(snapshot);
    }
}
