//! Camera connection supervision with bounded exponential backoff
//!
//! `ConnectionSupervisor` is the pure state machine. It never sleeps; each
//! transition returns the `SupervisorAction` the driver should take next.
//! `SupervisorRunner` is the async driver owning the timers, the operator
//! command channel and the `watch` channel that broadcasts the state.

use crate::domain::snapshot::{ConnectionState, DisconnectReason};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::camera::HealthProbe;
use crate::io::EgressSender;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Health probe period while Connected
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl SupervisorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            probe_interval: config.probe_interval(),
            probe_timeout: config.probe_timeout(),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            max_attempts: config.max_attempts(),
        }
    }

    /// `min(base * 2^attempt, max)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.checked_mul(factor).unwrap_or(self.max_delay).min(self.max_delay)
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

/// What the driver should do after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    /// Probe now
    Probe,
    /// Probe once the delay has elapsed
    ProbeAfter(Duration),
    /// Nothing scheduled
    Idle,
}

pub struct ConnectionSupervisor {
    state: ConnectionState,
    attempt: u32,
    settings: SupervisorSettings,
}

impl ConnectionSupervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self { state: ConnectionState::default(), attempt: 0, settings }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Leave Disconnected and probe. A no-op in any other state.
    pub fn start(&mut self) -> SupervisorAction {
        match self.state {
            ConnectionState::Disconnected { .. } => {
                self.state = ConnectionState::Connecting;
                self.attempt = 0;
                info!("camera_connecting");
                SupervisorAction::Probe
            }
            _ => SupervisorAction::Idle,
        }
    }

    pub fn on_probe_success(&mut self) -> SupervisorAction {
        match self.state {
            // A result arriving after stop/exhaustion is stale
            ConnectionState::Disconnected { .. } => SupervisorAction::Idle,
            ConnectionState::Connected => SupervisorAction::ProbeAfter(self.settings.probe_interval),
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. } => {
                info!(after_attempts = %self.attempt, "camera_connected");
                self.state = ConnectionState::Connected;
                self.attempt = 0;
                SupervisorAction::ProbeAfter(self.settings.probe_interval)
            }
        }
    }

    /// Failed probe or frame error
    pub fn on_failure(&mut self, cause: &str) -> SupervisorAction {
        if let ConnectionState::Disconnected { .. } = self.state {
            return SupervisorAction::Idle;
        }

        if self.attempt + 1 >= self.settings.max_attempts {
            self.attempt = self.settings.max_attempts;
            self.state = ConnectionState::Disconnected { reason: DisconnectReason::Exhausted };
            error!(attempts = %self.attempt, cause = %cause, "camera_offline");
            return SupervisorAction::Idle;
        }

        let delay = self.settings.backoff(self.attempt);
        self.attempt += 1;
        self.state = ConnectionState::Reconnecting { attempt: self.attempt };
        warn!(
            attempt = %self.attempt,
            max_attempts = %self.settings.max_attempts,
            delay_ms = %delay.as_millis(),
            cause = %cause,
            "camera_reconnecting"
        );
        SupervisorAction::ProbeAfter(delay)
    }

    /// Operator reset: back to Connecting with a fresh retry budget
    pub fn reset(&mut self) -> SupervisorAction {
        info!(previous = self.state.as_str(), "camera_reset");
        self.state = ConnectionState::Connecting;
        self.attempt = 0;
        SupervisorAction::Probe
    }

    pub fn stop(&mut self) -> SupervisorAction {
        self.state = ConnectionState::Disconnected { reason: DisconnectReason::Stopped };
        SupervisorAction::Idle
    }
}

/// Commands accepted by a running supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorCommand {
    Reset,
    Stop,
    /// A frame fetch failed while Connected
    FrameError(String),
}

/// Cloneable handle to a running supervisor
#[derive(Clone)]
pub struct SupervisorHandle {
    cmd_tx: mpsc::Sender<SupervisorCommand>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl SupervisorHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub async fn reset(&self) {
        let _ = self.cmd_tx.send(SupervisorCommand::Reset).await;
    }

    pub async fn stop(&self) {
        let _ = self.cmd_tx.send(SupervisorCommand::Stop).await;
    }

    /// Non-blocking; a full queue already holds a pending failure
    pub fn report_frame_error(&self, cause: String) {
        let _ = self.cmd_tx.try_send(SupervisorCommand::FrameError(cause));
    }

    /// Handle with no supervisor behind it, for tests that inspect the commands
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::Receiver<SupervisorCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (_state_tx, state_rx) = watch::channel(ConnectionState::default());
        (Self { cmd_tx, state_rx }, cmd_rx)
    }
}

pub struct SupervisorRunner<P: HealthProbe> {
    machine: ConnectionSupervisor,
    probe: Arc<P>,
    cmd_rx: mpsc::Receiver<SupervisorCommand>,
    state_tx: watch::Sender<ConnectionState>,
    metrics: Arc<Metrics>,
    egress: Option<EgressSender>,
    next_probe: Option<Instant>,
}

/// Create a supervisor runner and its handle
pub fn create_supervisor<P: HealthProbe>(
    settings: SupervisorSettings,
    probe: Arc<P>,
    metrics: Arc<Metrics>,
    egress: Option<EgressSender>,
) -> (SupervisorRunner<P>, SupervisorHandle) {
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (state_tx, state_rx) = watch::channel(ConnectionState::default());
    let runner = SupervisorRunner {
        machine: ConnectionSupervisor::new(settings),
        probe,
        cmd_rx,
        state_tx,
        metrics,
        egress,
        next_probe: None,
    };
    (runner, SupervisorHandle { cmd_tx, state_rx })
}

impl<P: HealthProbe> SupervisorRunner<P> {
    /// Drive the state machine until shutdown or every handle is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let action = self.machine.start();
        self.apply(action);

        loop {
            let deadline = self.next_probe;
            let timer = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = timer => {
                    self.next_probe = None;
                    let action = self.probe_once().await;
                    self.apply(action);
                }
                cmd = self.cmd_rx.recv() => {
                    let action = match cmd {
                        Some(SupervisorCommand::Reset) => self.machine.reset(),
                        Some(SupervisorCommand::Stop) => self.machine.stop(),
                        Some(SupervisorCommand::FrameError(cause)) => {
                            if self.machine.state().is_connected() {
                                self.record_failure(&cause)
                            } else {
                                continue;
                            }
                        }
                        None => break,
                    };
                    self.apply(action);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let action = self.machine.stop();
        self.apply(action);
        info!("supervisor_shutdown");
    }

    async fn probe_once(&mut self) -> SupervisorAction {
        let timeout = self.machine.settings().probe_timeout;
        match tokio::time::timeout(timeout, self.probe.probe()).await {
            Ok(Ok(())) => self.machine.on_probe_success(),
            Ok(Err(e)) => self.record_failure(&e.to_string()),
            Err(_) => self.record_failure("probe timed out"),
        }
    }

    fn record_failure(&mut self, cause: &str) -> SupervisorAction {
        self.metrics.record_probe_failure();
        let action = self.machine.on_failure(cause);
        if let SupervisorAction::ProbeAfter(_) = action {
            self.metrics.record_reconnect_attempt();
        }
        action
    }

    /// Schedule the next probe and broadcast the state if it changed
    fn apply(&mut self, action: SupervisorAction) {
        self.next_probe = match action {
            SupervisorAction::Probe => Some(Instant::now()),
            SupervisorAction::ProbeAfter(delay) => Some(Instant::now() + delay),
            SupervisorAction::Idle => None,
        };

        let state = self.machine.state();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            debug!(state = state.as_str(), "connection_state_changed");
            self.metrics.set_connection_state(&state);
            if let Some(egress) = &self.egress {
                egress.send_connection_state(&state);
            }
        }
    }
}
