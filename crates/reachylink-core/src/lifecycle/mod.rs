// ── Daemon lifecycle controller ──
//
// `start_daemon` probes through the session's `ModeStrategy`, then either
// goes straight to `Ready` or hands over to the session supervisor: one
// task that owns the startup deadline, readiness polling, and the
// launched process's output and exit signals. `stop_daemon` is the
// unconditional teardown sequence; the facade resets afterwards.

pub mod faults;
pub mod log;
pub mod process;
mod strategy;
pub mod usb;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backend::{DaemonApi, ProcessSignal};
use crate::config::ConnectionConfig;
use crate::error::{CoreError, LifecycleFault};
use crate::event::{ConnectionEvent, EventBus, OutputStream};
use crate::executor::{Outcome, RequestPolicy, TimedExecutor};
use crate::machine::StateMachine;
use crate::model::{ConnectionMode, CrashReason, RobotStatus, StartError, StartErrorKind};
use reachylink_api::DaemonState;

pub use log::DaemonLog;
pub use process::CommandLauncher;
pub(crate) use strategy::{ModeStrategy, StartPlan, strategy_for};

use strategy::Probe;

/// Everything a session's tasks share. Cloned into each task.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub mode: ConnectionMode,
    pub api: Arc<dyn DaemonApi>,
    pub config: Arc<ConnectionConfig>,
    pub machine: StateMachine,
    pub bus: EventBus,
    pub executor: TimedExecutor,
    pub cancel: CancellationToken,
    pub logs: DaemonLog,
}

// ── Start ────────────────────────────────────────────────────────────

/// Start (or attach to) the daemon for the current session.
///
/// Returns the supervisor handle when one was spawned. Startup failures
/// are published as `StartError` before being returned.
pub(crate) async fn start_daemon(
    ctx: &SessionContext,
    strategy: &Arc<dyn ModeStrategy>,
) -> Result<Option<JoinHandle<()>>, CoreError> {
    let probe = match strategy.probe(ctx).await {
        Ok(probe) => probe,
        Err(e) => {
            fail_start(ctx, &e);
            return Err(e);
        }
    };

    if ctx.cancel.is_cancelled() || ctx.machine.status() != RobotStatus::ReadyToStart {
        debug!("session changed during the daemon probe, startup abandoned");
        return Ok(None);
    }

    let plan = match probe {
        Probe::Running => {
            ctx.machine.ready()?;
            info!(mode = %ctx.mode, "daemon already running");
            ctx.logs.push("Daemon already running");
            ctx.bus.publish(ConnectionEvent::StartSuccess);
            return Ok(None);
        }
        Probe::NeedsStart => match strategy.start(ctx).await {
            Ok(plan) => plan,
            Err(e) => {
                fail_start(ctx, &e);
                return Err(e);
            }
        },
        Probe::Pending => StartPlan {
            signals: None,
            start_issued: false,
        },
    };

    if let Err(e) = ctx.machine.starting() {
        debug!(error = %e, "session changed during launch, startup abandoned");
        strategy.abandon(ctx).await;
        return Ok(None);
    }

    info!(
        mode = %ctx.mode,
        deadline_secs = ctx.config.startup_timeout_for(ctx.mode).as_secs(),
        "waiting for daemon to become ready"
    );
    let handle = tokio::spawn(supervise(
        ctx.clone(),
        plan.signals,
        plan.start_issued,
        strategy.wake_on_start(),
    ));
    Ok(Some(handle))
}

/// Send a start request without waiting on it. A timeout is expected
/// while the daemon brings the robot up and is tolerated.
pub(crate) fn issue_start(ctx: &SessionContext, wake_up: bool) {
    info!(wake_up, "requesting daemon start");
    ctx.bus.publish(ConnectionEvent::StartRequested { wake_up });

    let api = Arc::clone(&ctx.api);
    let cancel = ctx.cancel.clone();
    let deadline = ctx.config.command_timeout;
    tokio::spawn(async move {
        tokio::select! {
            () = cancel.cancelled() => {}
            result = api.start_daemon(wake_up, deadline) => match result {
                Ok(()) => debug!("daemon start accepted"),
                Err(e) if e.is_timeout() => debug!("daemon start request timed out, still waiting"),
                Err(e) => warn!(error = %e, "daemon start request failed"),
            },
        }
    });
}

fn fail_start(ctx: &SessionContext, err: &CoreError) {
    match err {
        CoreError::WifiConnection { .. } => {
            surface_start_error(ctx, StartErrorKind::WifiConnection, err, None);
        }
        _ => surface_start_error(
            ctx,
            StartErrorKind::LaunchFailed,
            err,
            Some(CrashReason::LaunchFailed),
        ),
    }
}

fn surface_start_error(
    ctx: &SessionContext,
    kind: StartErrorKind,
    err: &dyn std::fmt::Display,
    crash: Option<CrashReason>,
) {
    let error = StartError::new(kind, err.to_string());
    warn!(%kind, error = %error.message, "daemon startup failed");
    ctx.logs.push(format!("Startup failed: {}", error.message));
    ctx.machine.report_start_error(error.clone());
    ctx.bus.publish(ConnectionEvent::StartError(error));
    if let Some(reason) = crash {
        let _ = ctx.machine.crashed(reason);
    }
}

// ── Session supervisor ───────────────────────────────────────────────

async fn next_signal(signals: &mut Option<mpsc::Receiver<ProcessSignal>>) -> Option<ProcessSignal> {
    match signals {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn supervise(
    ctx: SessionContext,
    mut signals: Option<mpsc::Receiver<ProcessSignal>>,
    mut start_issued: bool,
    wake_up: bool,
) {
    let timeout = ctx.config.startup_timeout_for(ctx.mode);
    let mut deadline = Instant::now() + timeout;
    let mut last_rearm = Instant::now();
    let mut poll = time::interval(ctx.config.startup_poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let state = ctx.machine.snapshot();
        if matches!(
            state.status,
            RobotStatus::Disconnected | RobotStatus::Crashed
        ) {
            break;
        }
        let awaiting = state.status == RobotStatus::Starting;
        if !awaiting && signals.is_none() {
            break;
        }
        // A hardware fault suspends the deadline until the fault clears.
        let deadline_armed = awaiting && state.hardware_error.is_none();

        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => break,
            signal = next_signal(&mut signals) => match signal {
                Some(ProcessSignal::Output { stream, line }) => {
                    on_output(&ctx, stream, &line);
                    if deadline_armed
                        && last_rearm.elapsed() >= ctx.config.startup_rearm_min_interval
                    {
                        deadline = Instant::now() + timeout;
                        last_rearm = Instant::now();
                        debug!("startup deadline re-armed by daemon output");
                        ctx.bus.publish(ConnectionEvent::StartupDeadlineRearmed);
                    }
                }
                Some(ProcessSignal::Terminated { code }) => {
                    on_exit(&ctx, code);
                    signals = None;
                }
                None => signals = None,
            },
            () = time::sleep_until(deadline), if deadline_armed => {
                on_startup_timeout(&ctx, timeout);
            }
            _ = poll.tick(), if awaiting => {
                probe_startup(&ctx, &mut start_issued, wake_up).await;
            }
        }
    }
    debug!("session supervisor stopped");
}

fn on_output(ctx: &SessionContext, stream: OutputStream, line: &str) {
    trace!(%stream, line, "daemon output");
    ctx.logs.push(line);
    ctx.bus.publish(ConnectionEvent::DaemonOutput {
        stream,
        line: line.to_owned(),
    });
    if stream != OutputStream::Stderr {
        return;
    }

    let state = ctx.machine.snapshot();
    let starting = matches!(
        state.status,
        RobotStatus::ReadyToStart | RobotStatus::Starting
    );
    let existing = state.hardware_error;
    let Some(fault) = faults::classify_output(line, existing.as_ref(), starting) else {
        return;
    };
    if existing.as_ref().is_some_and(|e| e.kind == fault.kind) {
        return;
    }
    warn!(kind = %fault.kind, line = %fault.line, "hardware fault detected");
    ctx.bus.publish(ConnectionEvent::HardwareError(fault.clone()));
    if let Err(e) = ctx.machine.report_hardware_fault(fault) {
        debug!(error = %e, "hardware fault not attached");
    }
}

fn on_exit(ctx: &SessionContext, code: Option<i32>) {
    let fault = LifecycleFault::Exited { code };
    match ctx.machine.status() {
        RobotStatus::ReadyToStart | RobotStatus::Starting => surface_start_error(
            ctx,
            StartErrorKind::ProcessExited,
            &fault,
            Some(CrashReason::ProcessExited),
        ),
        status if status.is_active() => {
            warn!(%status, ?code, "daemon process exited while active");
            ctx.logs.push(fault.to_string());
            let _ = ctx.machine.crashed(CrashReason::ProcessExited);
        }
        status => debug!(%status, ?code, "daemon process exited during teardown"),
    }
}

fn on_startup_timeout(ctx: &SessionContext, timeout: Duration) {
    let fault = LifecycleFault::StartupTimeout {
        timeout_secs: timeout.as_secs(),
    };
    surface_start_error(
        ctx,
        StartErrorKind::StartupTimeout,
        &fault,
        Some(CrashReason::StartupTimeout),
    );
}

async fn probe_startup(ctx: &SessionContext, start_issued: &mut bool, wake_up: bool) {
    let deadline = ctx.config.status_probe_timeout;
    let result = ctx
        .executor
        .run(
            "daemon status",
            RequestPolicy::new(deadline),
            ctx.api.daemon_status(deadline),
        )
        .await;

    let status = match result {
        Ok(Outcome::Done(status)) => status,
        Ok(Outcome::Skipped) => return,
        Err(e) => {
            debug!(error = %e, "daemon not reachable yet");
            return;
        }
    };

    if ctx.machine.status() != RobotStatus::Starting {
        return;
    }
    match status.state {
        DaemonState::Running => {
            if ctx.machine.ready().is_ok() {
                info!(version = ?status.version, "daemon ready");
                ctx.logs.push("Daemon ready");
                ctx.bus.publish(ConnectionEvent::StartSuccess);
            }
        }
        state if state.is_idle() && !*start_issued => {
            *start_issued = true;
            issue_start(ctx, wake_up);
        }
        state => trace!(?state, "daemon still starting"),
    }
}

// ── Stop ─────────────────────────────────────────────────────────────

/// Teardown sequence. Never fails: every step is best effort and the
/// caller resets the connection afterwards.
pub(crate) async fn stop_daemon(ctx: &SessionContext, strategy: &dyn ModeStrategy) {
    if ctx.machine.status() == RobotStatus::Crashed {
        debug!("daemon crashed, skipping the stopping transition");
    } else if let Err(e) = ctx.machine.stopping() {
        debug!(error = %e, "stopping transition rejected");
    }
    info!(mode = %strategy.mode(), "stopping daemon");
    ctx.logs.push("Stopping daemon");

    let deadline = ctx.config.command_timeout;
    if let Err(e) = ctx
        .executor
        .run(
            "stop current app",
            RequestPolicy::new(deadline),
            ctx.api.stop_current_app(deadline),
        )
        .await
    {
        debug!(error = %e, "stop current app failed");
    }

    time::sleep(ctx.config.stop_grace_period).await;

    if let Err(e) = strategy.stop(ctx).await {
        warn!(error = %e, "daemon stop failed, tearing down anyway");
    }

    time::sleep(ctx.config.reset_delay).await;
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests;
