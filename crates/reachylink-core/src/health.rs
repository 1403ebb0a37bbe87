// ── Health monitor ──
//
// Polls `GET /api/daemon/status` every `health_interval` with a
// `health_request_timeout` deadline, at most one check in flight. The
// consecutive failure counter lives in `ConnectionState`; reaching
// `crash_threshold` requests the `Crashed` transition.
//
// Polling is suspended (counter untouched) while the daemon is crashed
// or not active, the window is hidden, a wake/sleep transition is in
// progress, or a classified hardware fault is attached. Reopening a gate
// resets the counter so paused time never counts against the threshold.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::backend::DaemonApi;
use crate::config::ConnectionConfig;
use crate::error::CoreError;
use crate::event::{ConnectionEvent, EventBus, HealthFailureKind};
use crate::executor::{Outcome, RequestPolicy, TimedExecutor};
use crate::machine::StateMachine;
use crate::model::{CrashReason, HardwareFaultKind, RobotStatus};

// ── Gate ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GateState {
    visible: bool,
    sleep_transition: bool,
}

/// External inputs that pause health polling. Cheap to clone.
#[derive(Clone)]
pub struct HealthGate {
    state: Arc<watch::Sender<GateState>>,
    machine: StateMachine,
}

impl HealthGate {
    pub fn new(machine: StateMachine) -> Self {
        let (state, _) = watch::channel(GateState {
            visible: true,
            sleep_transition: false,
        });
        Self {
            state: Arc::new(state),
            machine,
        }
    }

    /// Application window visibility. Hidden windows get throttled by
    /// the platform, which would produce false timeouts.
    pub fn set_window_visible(&self, visible: bool) {
        let reopened = self.update(|g| {
            let reopened = visible && !g.visible;
            g.visible = visible;
            reopened
        });
        if reopened {
            debug!("window visible again, health failure counter reset");
            self.machine.reset_health_failures();
        }
    }

    /// A wake-up or go-to-sleep animation is running.
    pub fn set_sleep_transition(&self, in_progress: bool) {
        let reopened = self.update(|g| {
            let reopened = !in_progress && g.sleep_transition;
            g.sleep_transition = in_progress;
            reopened
        });
        if reopened {
            debug!("sleep transition finished, health failure counter reset");
            self.machine.reset_health_failures();
        }
    }

    pub fn is_visible(&self) -> bool {
        self.state.borrow().visible
    }

    pub fn in_sleep_transition(&self) -> bool {
        self.state.borrow().sleep_transition
    }

    /// Clear the transition flag without touching visibility.
    pub(crate) fn reset(&self) {
        self.state.send_modify(|g| g.sleep_transition = false);
    }

    fn update(&self, apply: impl FnOnce(&mut GateState) -> bool) -> bool {
        let mut reopened = false;
        self.state.send_modify(|g| reopened = apply(g));
        reopened
    }
}

// ── Monitor ──────────────────────────────────────────────────────────

/// Why a tick did not poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotActive,
    Crashed,
    Hidden,
    SleepTransition,
    HardwareError,
    /// The executor skipped the request while installing.
    Busy,
}

/// Result of one health tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Skipped(SkipReason),
    Healthy,
    Failed {
        kind: HealthFailureKind,
        consecutive: u32,
    },
    /// This tick requested the `Crashed` transition.
    Crashed,
}

/// Liveness poller for one session.
#[derive(Clone)]
pub struct HealthMonitor {
    api: Arc<dyn DaemonApi>,
    machine: StateMachine,
    bus: EventBus,
    executor: TimedExecutor,
    gate: HealthGate,
    config: Arc<ConnectionConfig>,
}

impl HealthMonitor {
    pub fn new(
        api: Arc<dyn DaemonApi>,
        machine: StateMachine,
        bus: EventBus,
        gate: HealthGate,
        config: Arc<ConnectionConfig>,
    ) -> Self {
        Self {
            api,
            executor: TimedExecutor::new(machine.clone()),
            machine,
            bus,
            gate,
            config,
        }
    }

    /// Poll every `health_interval` until cancelled. Each check is
    /// awaited inline, so checks never overlap.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = time::interval(self.config.health_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let outcome = self.tick().await;
            trace!(?outcome, "health tick");
        }
        debug!("health monitor stopped");
    }

    /// One gated liveness check.
    pub async fn tick(&self) -> TickOutcome {
        if let Some(reason) = self.gate_closed() {
            return TickOutcome::Skipped(reason);
        }

        let deadline = self.config.health_request_timeout;
        let result = self
            .executor
            .run(
                "health check",
                RequestPolicy::skippable(deadline),
                self.api.daemon_status(deadline),
            )
            .await;

        // The world may have moved on while the check was in flight.
        if let Some(reason) = self.gate_closed() {
            return TickOutcome::Skipped(reason);
        }

        match result {
            Ok(Outcome::Skipped) => TickOutcome::Skipped(SkipReason::Busy),
            Ok(Outcome::Done(status)) => match status.backend_error() {
                Some(error) => {
                    debug!(error, "daemon reports a backend error");
                    self.failure(HealthFailureKind::BackendError)
                }
                None => {
                    self.machine.record_health_success();
                    self.bus.publish(ConnectionEvent::HealthSuccess);
                    TickOutcome::Healthy
                }
            },
            Err(e) => {
                debug!(error = %e, "health check failed");
                self.failure(classify(&e))
            }
        }
    }

    fn gate_closed(&self) -> Option<SkipReason> {
        let state = self.machine.snapshot();
        if state.status == RobotStatus::Crashed || state.is_daemon_crashed {
            return Some(SkipReason::Crashed);
        }
        if state.is_active() && state.mode.is_none() {
            warn!(status = %state.status, "active status without a connection mode");
            if let Err(e) = self.machine.crashed(CrashReason::InvalidState) {
                warn!(error = %e, "could not mark invalid state as crashed");
            }
            return Some(SkipReason::Crashed);
        }
        if !state.is_active() {
            return Some(SkipReason::NotActive);
        }
        if state
            .hardware_error
            .as_ref()
            .is_some_and(|f| f.kind != HardwareFaultKind::Unclassified)
        {
            return Some(SkipReason::HardwareError);
        }
        if !self.gate.is_visible() {
            return Some(SkipReason::Hidden);
        }
        if self.gate.in_sleep_transition() {
            return Some(SkipReason::SleepTransition);
        }
        None
    }

    fn failure(&self, kind: HealthFailureKind) -> TickOutcome {
        let consecutive = self.machine.record_health_failure();
        warn!(%kind, consecutive, threshold = self.config.crash_threshold, "health check failed");
        self.bus
            .publish(ConnectionEvent::HealthFailure { kind, consecutive });
        if consecutive >= self.config.crash_threshold
            && self.machine.crashed(CrashReason::HealthThreshold).is_ok()
        {
            return TickOutcome::Crashed;
        }
        TickOutcome::Failed { kind, consecutive }
    }
}

/// Map a failed check onto its health failure kind.
pub fn classify(error: &CoreError) -> HealthFailureKind {
    match error {
        CoreError::TransportTimeout { .. }
        | CoreError::Transport { .. }
        | CoreError::WifiConnection { .. } => HealthFailureKind::Network,
        CoreError::HttpStatus { .. } => HealthFailureKind::HttpError,
        CoreError::BackendFault { .. } => HealthFailureKind::BackendError,
        _ => HealthFailureKind::Error,
    }
}
