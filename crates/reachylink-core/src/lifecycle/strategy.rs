// ── Mode strategies ──
//
// One implementation per way of reaching the daemon, selected once per
// session. `LocalStrategy` owns a child process (direct and simulated
// modes); `RemoteStrategy` only talks HTTP.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{SessionContext, issue_start};
use crate::backend::{LaunchSpec, ProcessLauncher, ProcessSignal};
use crate::error::CoreError;
use crate::executor::{Outcome, RequestPolicy};
use crate::model::ConnectionMode;
use reachylink_api::DaemonState;

/// What the initial probe found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Probe {
    /// The daemon already serves robot data.
    Running,
    /// The daemon must be started (or launched).
    NeedsStart,
    /// Reachable but in a transitional state; wait for it.
    Pending,
}

/// How the supervisor should follow a startup.
pub(crate) struct StartPlan {
    /// Signals of a freshly launched process.
    pub signals: Option<mpsc::Receiver<ProcessSignal>>,
    /// A start request was already sent.
    pub start_issued: bool,
}

pub(crate) trait ModeStrategy: Send + Sync {
    fn mode(&self) -> ConnectionMode;

    /// `wake_up` flag of start requests issued while starting.
    fn wake_on_start(&self) -> bool;

    fn probe<'a>(&'a self, ctx: &'a SessionContext) -> BoxFuture<'a, Result<Probe, CoreError>>;

    fn start<'a>(&'a self, ctx: &'a SessionContext)
    -> BoxFuture<'a, Result<StartPlan, CoreError>>;

    fn stop<'a>(&'a self, ctx: &'a SessionContext) -> BoxFuture<'a, Result<(), CoreError>>;

    /// Release whatever `start` acquired when the session ended before
    /// the startup could be followed.
    fn abandon<'a>(&'a self, _ctx: &'a SessionContext) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

/// Pick the strategy for a session.
pub(crate) fn strategy_for(
    mode: ConnectionMode,
    serial_port: Option<String>,
    launcher: Arc<dyn ProcessLauncher>,
) -> Arc<dyn ModeStrategy> {
    match mode {
        ConnectionMode::Remote => Arc::new(RemoteStrategy),
        ConnectionMode::Direct => Arc::new(LocalStrategy {
            spec: LaunchSpec {
                simulated: false,
                serial_port,
            },
            launcher,
        }),
        ConnectionMode::Simulated => Arc::new(LocalStrategy {
            spec: LaunchSpec {
                simulated: true,
                serial_port: None,
            },
            launcher,
        }),
    }
}

// ── Local ───────────────────────────────────────────────────────────

pub(crate) struct LocalStrategy {
    spec: LaunchSpec,
    launcher: Arc<dyn ProcessLauncher>,
}

impl ModeStrategy for LocalStrategy {
    fn mode(&self) -> ConnectionMode {
        if self.spec.simulated {
            ConnectionMode::Simulated
        } else {
            ConnectionMode::Direct
        }
    }

    fn wake_on_start(&self) -> bool {
        true
    }

    fn probe<'a>(&'a self, ctx: &'a SessionContext) -> BoxFuture<'a, Result<Probe, CoreError>> {
        Box::pin(async move {
            let deadline = ctx.config.state_probe_timeout;
            let result = ctx
                .executor
                .run(
                    "state probe",
                    RequestPolicy::new(deadline),
                    ctx.api.full_state(deadline),
                )
                .await;
            match result {
                Ok(Outcome::Done(_)) => {
                    info!("local daemon already running");
                    Ok(Probe::Running)
                }
                Ok(Outcome::Skipped) => Ok(Probe::NeedsStart),
                Err(e) => {
                    debug!(error = %e, "no running local daemon");
                    Ok(Probe::NeedsStart)
                }
            }
        })
    }

    fn start<'a>(
        &'a self,
        ctx: &'a SessionContext,
    ) -> BoxFuture<'a, Result<StartPlan, CoreError>> {
        Box::pin(async move {
            ctx.logs.push(format!("Launching daemon ({} mode)", self.mode()));
            let signals = self.launcher.launch(&self.spec)?;
            Ok(StartPlan {
                signals: Some(signals),
                start_issued: false,
            })
        })
    }

    fn stop<'a>(&'a self, ctx: &'a SessionContext) -> BoxFuture<'a, Result<(), CoreError>> {
        Box::pin(async move {
            let deadline = ctx.config.command_timeout;
            let stopped = ctx
                .executor
                .run(
                    "daemon stop",
                    RequestPolicy::new(deadline),
                    ctx.api.stop_daemon(true, deadline),
                )
                .await;
            if let Err(e) = &stopped {
                debug!(error = %e, "daemon stop request failed, terminating process");
            }
            self.launcher.terminate().await
        })
    }

    fn abandon<'a>(&'a self, _ctx: &'a SessionContext) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Err(e) = self.launcher.terminate().await {
                debug!(error = %e, "failed to terminate abandoned daemon");
            }
        })
    }
}

// ── Remote ──────────────────────────────────────────────────────────

pub(crate) struct RemoteStrategy;

impl ModeStrategy for RemoteStrategy {
    fn mode(&self) -> ConnectionMode {
        ConnectionMode::Remote
    }

    fn wake_on_start(&self) -> bool {
        false
    }

    fn probe<'a>(&'a self, ctx: &'a SessionContext) -> BoxFuture<'a, Result<Probe, CoreError>> {
        Box::pin(async move {
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
                Ok(Outcome::Skipped) => return Ok(Probe::Pending),
                Err(e) => {
                    let host = ctx
                        .api
                        .base_url()
                        .host_str()
                        .unwrap_or_default()
                        .to_owned();
                    return Err(CoreError::WifiConnection {
                        host,
                        reason: e.to_string(),
                    });
                }
            };
            Ok(match status.state {
                DaemonState::Running => Probe::Running,
                state if state.needs_start() => Probe::NeedsStart,
                state => {
                    debug!(?state, "remote daemon in transitional state");
                    Probe::Pending
                }
            })
        })
    }

    fn start<'a>(
        &'a self,
        ctx: &'a SessionContext,
    ) -> BoxFuture<'a, Result<StartPlan, CoreError>> {
        Box::pin(async move {
            issue_start(ctx, self.wake_on_start());
            Ok(StartPlan {
                signals: None,
                start_issued: true,
            })
        })
    }

    fn stop<'a>(&'a self, ctx: &'a SessionContext) -> BoxFuture<'a, Result<(), CoreError>> {
        Box::pin(async move {
            let deadline = ctx.config.command_timeout;
            ctx.executor
                .run(
                    "daemon stop",
                    RequestPolicy::new(deadline),
                    ctx.api.stop_daemon(true, deadline),
                )
                .await
                .map(drop)
        })
    }
}
