// ── Connection facade ──
//
// Single entry point for consumers. Owns the per-session tasks (health
// monitor, streams, startup supervisor) and tears them down as a unit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use reachylink_api::client::{MOVE_UPDATES_PATH, state_stream_path};
use serde_json::Value;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{
    ApiFactory, FetchRequest, HttpApiFactory, ProcessLauncher, StreamConnector,
    WebSocketConnector,
};
use crate::config::ConnectionConfig;
use crate::error::CoreError;
use crate::event::{ConnectionEvent, EventBus};
use crate::executor::{Outcome, RequestPolicy, TimedExecutor};
use crate::health::{HealthGate, HealthMonitor};
use crate::lifecycle::{self, CommandLauncher, DaemonLog, ModeStrategy, SessionContext};
use crate::machine::StateMachine;
use crate::model::{
    ActiveMoveRecord, ConnectionMode, ConnectionState, PASSIVE_JOINT_COUNT, RobotStatus,
};
use crate::telemetry::{
    ActiveMoves, MovesSink, StreamEnd, StreamSpec, TelemetrySink, TelemetryStore, run_stream,
};

// ── Options ──────────────────────────────────────────────────────────

/// Mode-specific connect parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Serial device of a USB-connected robot. Required for `Direct`.
    pub serial_port: Option<String>,
    /// Robot hostname or address. Required for `Remote`.
    pub host: Option<String>,
}

impl ConnectOptions {
    pub fn direct(serial_port: impl Into<String>) -> Self {
        Self {
            serial_port: Some(serial_port.into()),
            host: None,
        }
    }

    pub fn remote(host: impl Into<String>) -> Self {
        Self {
            serial_port: None,
            host: Some(host.into()),
        }
    }

    pub fn simulated() -> Self {
        Self::default()
    }

    fn validate(&self, mode: ConnectionMode) -> Result<(), CoreError> {
        let missing = match mode {
            ConnectionMode::Direct => blank(self.serial_port.as_deref()).then_some("serial port"),
            ConnectionMode::Remote => blank(self.host.as_deref()).then_some("host"),
            ConnectionMode::Simulated => None,
        };
        match missing {
            Some(what) => Err(CoreError::InvalidOptions {
                message: format!("{mode} mode requires a {what}"),
            }),
            None => Ok(()),
        }
    }
}

fn blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

// ── Backends ─────────────────────────────────────────────────────────

/// The outward-facing seams a connection talks through.
#[derive(Clone)]
pub struct Backends {
    pub api: Arc<dyn ApiFactory>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub streams: Arc<dyn StreamConnector>,
}

impl Backends {
    /// HTTP client, local process launcher and WebSocket connector.
    pub fn production(config: &ConnectionConfig) -> Self {
        Self {
            api: Arc::new(HttpApiFactory::default()),
            launcher: Arc::new(CommandLauncher::new(config.launch.clone())),
            streams: Arc::new(WebSocketConnector),
        }
    }
}

// ── Connection ───────────────────────────────────────────────────────

/// Connection to a Reachy Mini daemon.
///
/// Cheaply cloneable via `Arc<ConnectionInner>`. At most one session is
/// live at a time; `connect` and `disconnect` refuse (return `false`)
/// instead of queueing when another one is in progress.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    config: Arc<ConnectionConfig>,
    backends: Backends,
    bus: EventBus,
    machine: StateMachine,
    executor: TimedExecutor,
    telemetry: TelemetryStore,
    moves: ActiveMoves,
    gate: HealthGate,
    logs: DaemonLog,
    session: Mutex<Option<ActiveSession>>,
    connecting: AtomicBool,
    tearing_down: AtomicBool,
}

struct ActiveSession {
    ctx: SessionContext,
    strategy: Arc<dyn ModeStrategy>,
    handles: Vec<JoinHandle<()>>,
}

/// Holds an in-progress flag for the lifetime of an operation.
struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Connection {
    /// Connection over the production backends.
    pub fn new(config: ConnectionConfig) -> Result<Self, CoreError> {
        let backends = Backends::production(&config);
        Self::with_backends(config, backends)
    }

    pub fn with_backends(config: ConnectionConfig, backends: Backends) -> Result<Self, CoreError> {
        config.validate()?;
        let bus = EventBus::new(config.event_capacity);
        let machine = StateMachine::new(bus.clone());

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                executor: TimedExecutor::new(machine.clone()),
                gate: HealthGate::new(machine.clone()),
                logs: DaemonLog::new(config.log_capacity),
                config: Arc::new(config),
                backends,
                bus,
                machine,
                telemetry: TelemetryStore::new(),
                moves: ActiveMoves::new(),
                session: Mutex::new(None),
                connecting: AtomicBool::new(false),
                tearing_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Open a session in `mode` and start (or attach to) the daemon.
    ///
    /// `Ok(false)` when a connect or teardown is already in progress or
    /// a session is live. Startup failures are also published on the
    /// event bus; an unreachable remote host resets the connection.
    pub async fn connect(
        &self,
        mode: ConnectionMode,
        options: ConnectOptions,
    ) -> Result<bool, CoreError> {
        let Some(_connecting) = FlagGuard::acquire(&self.inner.connecting) else {
            debug!(%mode, "connect already in progress");
            return Ok(false);
        };
        if self.inner.tearing_down.load(Ordering::Acquire)
            || self.inner.machine.status() != RobotStatus::Disconnected
        {
            debug!(%mode, status = %self.inner.machine.status(), "connect refused");
            return Ok(false);
        }
        options.validate(mode)?;

        let inner = &self.inner;
        let base_url = inner.config.base_url(mode, options.host.as_deref())?;
        let api = inner.backends.api.connect(base_url.clone())?;
        inner.machine.begin_session(mode, options.host.clone())?;
        inner.logs.clear();
        info!(%mode, %base_url, "connecting to daemon");

        let ctx = SessionContext {
            mode,
            api,
            config: Arc::clone(&inner.config),
            machine: inner.machine.clone(),
            bus: inner.bus.clone(),
            executor: inner.executor.clone(),
            cancel: CancellationToken::new(),
            logs: inner.logs.clone(),
        };
        let strategy =
            lifecycle::strategy_for(mode, options.serial_port, Arc::clone(&inner.backends.launcher));

        let monitor = HealthMonitor::new(
            Arc::clone(&ctx.api),
            ctx.machine.clone(),
            ctx.bus.clone(),
            inner.gate.clone(),
            Arc::clone(&ctx.config),
        );
        let handles = vec![
            tokio::spawn(monitor.run(ctx.cancel.clone())),
            tokio::spawn(run_streams(
                ctx.clone(),
                Arc::clone(&inner.backends.streams),
                inner.telemetry.clone(),
                inner.moves.clone(),
            )),
        ];
        *inner.session.lock().await = Some(ActiveSession {
            ctx: ctx.clone(),
            strategy: Arc::clone(&strategy),
            handles,
        });

        match lifecycle::start_daemon(&ctx, &strategy).await {
            Ok(supervisor) => {
                if let Some(handle) = supervisor {
                    match inner.session.lock().await.as_mut() {
                        Some(session) if !ctx.cancel.is_cancelled() => session.handles.push(handle),
                        _ => handle.abort(),
                    }
                }
                Ok(true)
            }
            Err(e @ CoreError::WifiConnection { .. }) => {
                warn!(error = %e, "remote daemon unreachable");
                self.reset_all().await;
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "daemon failed to start");
                Err(e)
            }
        }
    }

    /// Stop the daemon and tear the session down.
    ///
    /// `false` when there is no session or a teardown is already running.
    /// Every step is best effort; the connection always ends up reset.
    pub async fn disconnect(&self) -> bool {
        let Some(_tearing_down) = FlagGuard::acquire(&self.inner.tearing_down) else {
            debug!("teardown already in progress");
            return false;
        };
        let Some(session) = self.inner.session.lock().await.take() else {
            debug!("nothing to disconnect");
            return false;
        };

        lifecycle::stop_daemon(&session.ctx, session.strategy.as_ref()).await;
        self.finish_reset(Some(session));
        true
    }

    /// Cancel every session task and return to `Disconnected`.
    pub async fn reset_all(&self) {
        let session = self.inner.session.lock().await.take();
        if let Some(session) = &session {
            session.ctx.cancel.cancel();
            session.strategy.abandon(&session.ctx).await;
        }
        self.finish_reset(session);
    }

    fn finish_reset(&self, session: Option<ActiveSession>) {
        if let Some(session) = session {
            session.ctx.cancel.cancel();
            for handle in session.handles {
                handle.abort();
            }
        }
        let inner = &self.inner;
        inner.machine.reset_all();
        inner.telemetry.clear();
        inner.moves.clear();
        inner.gate.reset();
        inner.bus.publish(ConnectionEvent::Reset);
        info!("connection reset");
    }

    // ── Requests ─────────────────────────────────────────────────────

    /// Send a request relative to the active session's base URL.
    pub async fn fetch(&self, request: FetchRequest) -> Result<Outcome<Value>, CoreError> {
        request.validate()?;
        let api = self
            .inner
            .session
            .lock()
            .await
            .as_ref()
            .map(|s| Arc::clone(&s.ctx.api))
            .ok_or(CoreError::NotConnected)?;

        let operation = format!("{} {}", request.method, request.path);
        let policy = RequestPolicy {
            deadline: request.deadline,
            skip_when_busy: request.skip_when_busy,
        };
        self.inner
            .executor
            .run(&operation, policy, api.fetch(request))
            .await
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.inner.machine.snapshot()
    }

    pub fn status(&self) -> RobotStatus {
        self.inner.machine.status()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.machine.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.bus.subscribe()
    }

    pub fn telemetry(&self) -> &TelemetryStore {
        &self.inner.telemetry
    }

    pub fn active_moves(&self) -> Vec<ActiveMoveRecord> {
        self.inner.moves.snapshot()
    }

    pub fn daemon_logs(&self) -> Vec<String> {
        self.inner.logs.lines()
    }

    /// State transitions requested by the application (busy, sleeping).
    pub fn machine(&self) -> &StateMachine {
        &self.inner.machine
    }

    // ── External inputs ──────────────────────────────────────────────

    pub fn set_passive_joints(&self, joints: Option<[f64; PASSIVE_JOINT_COUNT]>) {
        self.inner.telemetry.set_passive_joints(joints);
    }

    pub fn set_window_visible(&self, visible: bool) {
        self.inner.gate.set_window_visible(visible);
    }

    pub fn set_sleep_transition(&self, in_progress: bool) {
        self.inner.gate.set_sleep_transition(in_progress);
    }
}

// ── Streams ──────────────────────────────────────────────────────────

/// Run both daemon streams whenever the session is active.
async fn run_streams(
    ctx: SessionContext,
    connector: Arc<dyn StreamConnector>,
    telemetry: TelemetryStore,
    moves: ActiveMoves,
) {
    let max_attempts = ctx.config.max_reconnect_attempts(ctx.mode);
    let delay = ctx.config.stream_reconnect_delay;
    let urls = ctx
        .api
        .stream_url(&state_stream_path(ctx.config.stream_frequency))
        .and_then(|state| {
            ctx.api
                .stream_url(MOVE_UPDATES_PATH)
                .map(|moves| (state, moves))
        });
    let (state_url, moves_url) = match urls {
        Ok(urls) => urls,
        Err(e) => {
            warn!(error = %e, "cannot derive stream urls, streams disabled");
            return;
        }
    };
    let state_spec = StreamSpec {
        name: "state",
        url: state_url,
        max_attempts,
        delay,
    };
    let moves_spec = StreamSpec {
        name: "moves",
        url: moves_url,
        max_attempts,
        delay,
    };

    let mut state = ctx.machine.subscribe();
    loop {
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return,
            ok = wait_until(&mut state, ConnectionState::is_active) => if !ok { return },
        }

        let telemetry_sink = TelemetrySink::new(telemetry.clone(), ctx.bus.clone());
        let moves_sink = MovesSink::new(
            Arc::clone(&ctx.api),
            ctx.executor.clone(),
            moves.clone(),
            ctx.bus.clone(),
            ctx.config.moves_seed_timeout,
        );
        let (state_end, moves_end) = tokio::join!(
            run_stream(&state_spec, connector.as_ref(), &ctx.machine, &ctx.cancel, &telemetry_sink),
            run_stream(&moves_spec, connector.as_ref(), &ctx.machine, &ctx.cancel, &moves_sink),
        );
        debug!(?state_end, ?moves_end, "streams ended");
        if state_end == StreamEnd::Cancelled {
            return;
        }

        // Streams that gave up stay down until the next active period.
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return,
            ok = wait_until(&mut state, |s| !s.is_active()) => if !ok { return },
        }
    }
}

async fn wait_until(
    state: &mut watch::Receiver<ConnectionState>,
    predicate: impl FnMut(&ConnectionState) -> bool,
) -> bool {
    state.wait_for(predicate).await.is_ok()
}
