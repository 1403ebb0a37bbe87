// ── Connection state machine ──
//
// Sole writer of `ConnectionState`. Health, lifecycle and telemetry
// request transitions through this API; nothing else mutates the
// snapshot. Rejected transitions are logged and returned as
// `CoreError::InvalidTransition`, leaving the state untouched.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::event::{ConnectionEvent, EventBus};
use crate::model::{
    BusyReason, ConnectionMode, ConnectionState, CrashReason, HardwareFault, RobotStatus,
    StartError,
};

/// Whether `from -> to` is an edge of the transition table.
///
/// `Disconnected` is not a target here: it is only reachable through
/// [`StateMachine::reset_all`].
pub fn is_allowed(from: RobotStatus, to: RobotStatus) -> bool {
    use RobotStatus as S;

    if to == S::Crashed {
        return !matches!(from, S::Disconnected | S::Crashed);
    }
    matches!(
        (from, to),
        (S::Disconnected, S::ReadyToStart)
            | (S::ReadyToStart | S::Starting, S::Starting | S::Ready | S::Sleeping)
            | (S::Sleeping | S::Busy, S::Ready | S::Busy | S::Sleeping)
            | (S::Ready, S::Sleeping | S::Busy)
            | (
                S::ReadyToStart | S::Starting | S::Sleeping | S::Ready | S::Busy,
                S::Stopping
            )
    )
}

/// Cheaply cloneable handle to the shared connection state.
#[derive(Clone)]
pub struct StateMachine {
    inner: Arc<MachineInner>,
}

struct MachineInner {
    state: watch::Sender<ConnectionState>,
    bus: EventBus,
}

impl StateMachine {
    pub fn new(bus: EventBus) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            inner: Arc::new(MachineInner { state, bus }),
        }
    }

    // ── Observation ──────────────────────────────────────────────────

    /// A fresh copy of the current state.
    pub fn snapshot(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn status(&self) -> RobotStatus {
        self.inner.state.borrow().status
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Open a session: `Disconnected -> ReadyToStart`, recording mode and host.
    pub fn begin_session(
        &self,
        mode: ConnectionMode,
        remote_host: Option<String>,
    ) -> Result<(), CoreError> {
        self.transition(RobotStatus::ReadyToStart, |s| {
            s.mode = Some(mode);
            s.remote_host = remote_host;
            s.is_daemon_crashed = false;
            s.consecutive_health_failures = 0;
        })
        .map(drop)
    }

    pub fn starting(&self) -> Result<(), CoreError> {
        self.transition(RobotStatus::Starting, |_| {}).map(drop)
    }

    /// The daemon is up. Clears any startup or hardware error.
    pub fn ready(&self) -> Result<(), CoreError> {
        self.transition(RobotStatus::Ready, |s| {
            s.busy_reason = None;
            s.start_error = None;
            s.hardware_error = None;
        })
        .map(drop)
    }

    pub fn sleeping(&self) -> Result<(), CoreError> {
        self.transition(RobotStatus::Sleeping, |s| s.busy_reason = None)
            .map(drop)
    }

    pub fn busy(&self, reason: BusyReason) -> Result<(), CoreError> {
        self.transition(RobotStatus::Busy, |s| s.busy_reason = Some(reason))
            .map(drop)
    }

    pub fn stopping(&self) -> Result<(), CoreError> {
        self.transition(RobotStatus::Stopping, |s| s.busy_reason = None)
            .map(drop)
    }

    /// Terminal until [`reset_all`](Self::reset_all).
    pub fn crashed(&self, reason: CrashReason) -> Result<(), CoreError> {
        let previous = self.transition(RobotStatus::Crashed, |s| {
            s.is_daemon_crashed = true;
            s.busy_reason = None;
        })?;
        warn!(%previous, %reason, "daemon declared crashed");
        self.inner
            .bus
            .publish(ConnectionEvent::Crash { previous, reason });
        Ok(())
    }

    /// Return to `Disconnected`, clearing mode, host, counters and errors.
    pub fn reset_all(&self) {
        let previous = self.inner.state.send_replace(ConnectionState::default());
        info!(previous = %previous.status, "connection state reset");
        if previous.status != RobotStatus::Disconnected {
            self.inner.bus.publish(ConnectionEvent::StateChanged {
                previous: previous.status,
                current: ConnectionState::default(),
            });
        }
    }

    /// Attach a hardware fault.
    ///
    /// During startup the machine re-enters `Starting` with the fault
    /// attached; while active the status is kept and only the fault is
    /// recorded. Ignored once stopping, crashed, or disconnected.
    pub fn report_hardware_fault(&self, fault: HardwareFault) -> Result<(), CoreError> {
        match self.status() {
            RobotStatus::ReadyToStart | RobotStatus::Starting => self
                .transition(RobotStatus::Starting, |s| s.hardware_error = Some(fault))
                .map(drop),
            status if status.is_active() => self
                .transition(status, |s| s.hardware_error = Some(fault))
                .map(drop),
            status => {
                debug!(%status, kind = %fault.kind, "hardware fault ignored outside a session");
                Err(CoreError::InvalidTransition {
                    from: status,
                    to: RobotStatus::Starting,
                })
            }
        }
    }

    /// Record why a startup attempt failed. Does not change the status.
    pub fn report_start_error(&self, error: StartError) {
        self.inner
            .state
            .send_modify(|s| s.start_error = Some(error));
    }

    // ── Health counter ───────────────────────────────────────────────

    pub fn record_health_success(&self) {
        self.reset_health_failures();
    }

    /// Increment the consecutive failure counter, returning the new value.
    pub fn record_health_failure(&self) -> u32 {
        let mut count = 0;
        self.inner.state.send_modify(|s| {
            s.consecutive_health_failures = s.consecutive_health_failures.saturating_add(1);
            count = s.consecutive_health_failures;
        });
        count
    }

    pub fn reset_health_failures(&self) {
        self.inner.state.send_if_modified(|s| {
            let modified = s.consecutive_health_failures != 0;
            s.consecutive_health_failures = 0;
            modified
        });
    }

    /// Overwrite the state without validation.
    #[cfg(test)]
    pub(crate) fn force_state(&self, apply: impl FnOnce(&mut ConnectionState)) {
        self.inner.state.send_modify(apply);
    }

    // ── Internals ────────────────────────────────────────────────────

    fn transition(
        &self,
        to: RobotStatus,
        apply: impl FnOnce(&mut ConnectionState),
    ) -> Result<RobotStatus, CoreError> {
        let mut outcome = Err(RobotStatus::Disconnected);
        self.inner.state.send_if_modified(|s| {
            // Re-entering the same status is only meaningful as an edge
            // of the table or as a fault attachment on an active status.
            let same_active = s.status == to && to.is_active();
            if !is_allowed(s.status, to) && !same_active {
                outcome = Err(s.status);
                return false;
            }
            let previous = s.status;
            s.status = to;
            apply(s);
            outcome = Ok((previous, s.clone()));
            true
        });

        match outcome {
            Ok((previous, current)) => {
                debug!(%previous, current = %current.status, "state transition");
                self.inner
                    .bus
                    .publish(ConnectionEvent::StateChanged { previous, current });
                Ok(previous)
            }
            Err(from) => {
                warn!(%from, %to, "invalid state transition ignored");
                Err(CoreError::InvalidTransition { from, to })
            }
        }
    }
}
