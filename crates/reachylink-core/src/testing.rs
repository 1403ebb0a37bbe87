// Scripted fakes for the backend seams, shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use reachylink_api::websocket::EventStream;
use reachylink_api::{BackendStatus, DaemonState, DaemonStatus, FullState, RunningMove, StreamEvent};
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::backend::{
    ApiFactory, DaemonApi, FetchRequest, LaunchSpec, ProcessLauncher, ProcessSignal,
    StreamConnector,
};
use crate::config::ConnectionConfig;
use crate::error::{CoreError, LifecycleFault};
use crate::event::{ConnectionEvent, EventBus};
use crate::executor::TimedExecutor;
use crate::lifecycle::{DaemonLog, SessionContext};
use crate::machine::StateMachine;
use crate::model::ConnectionMode;

// ── Daemon API ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) enum StatusReply {
    State(DaemonState),
    BackendError(String),
    Http(u16),
    Unreachable,
    Hang,
}

impl StatusReply {
    async fn resolve(self) -> Result<DaemonStatus, CoreError> {
        match self {
            Self::State(state) => Ok(DaemonStatus {
                state,
                version: Some("test".into()),
                backend_status: None,
            }),
            Self::BackendError(message) => Ok(DaemonStatus {
                state: DaemonState::Running,
                version: None,
                backend_status: Some(BackendStatus {
                    error: Some(message),
                    ready: Some(false),
                }),
            }),
            Self::Http(status) => Err(CoreError::HttpStatus {
                status,
                body: String::new(),
            }),
            Self::Unreachable => Err(refused()),
            Self::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(refused())
            }
        }
    }
}

fn refused() -> CoreError {
    CoreError::Transport {
        reason: "connection refused".into(),
    }
}

pub(crate) struct FakeApi {
    base_url: Url,
    statuses: Mutex<VecDeque<StatusReply>>,
    default_status: Mutex<StatusReply>,
    full_state_ok: AtomicBool,
    moves: Mutex<Vec<RunningMove>>,
    calls: Mutex<Vec<String>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Self::at("http://127.0.0.1:8000")
    }

    pub fn at(base: &str) -> Arc<Self> {
        Arc::new(Self {
            base_url: Url::parse(base).unwrap(),
            statuses: Mutex::new(VecDeque::new()),
            default_status: Mutex::new(StatusReply::State(DaemonState::Running)),
            full_state_ok: AtomicBool::new(false),
            moves: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Replies consumed in order before falling back to the default.
    pub fn script_status(&self, replies: impl IntoIterator<Item = StatusReply>) {
        self.statuses.lock().unwrap().extend(replies);
    }

    pub fn set_default_status(&self, reply: StatusReply) {
        *self.default_status.lock().unwrap() = reply;
    }

    pub fn set_full_state_ok(&self, ok: bool) {
        self.full_state_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_running_moves(&self, ids: &[&str]) {
        *self.moves.lock().unwrap() = ids
            .iter()
            .map(|id| RunningMove::Object {
                uuid: (*id).to_owned(),
            })
            .collect();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn next_status(&self) -> StatusReply {
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_status.lock().unwrap().clone())
    }
}

impl DaemonApi for FakeApi {
    fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn daemon_status(&self, _deadline: Duration) -> BoxFuture<'_, Result<DaemonStatus, CoreError>> {
        // Recorded when polled, so requests skipped by policy never show up.
        Box::pin(async move {
            self.record("status");
            self.next_status().resolve().await
        })
    }

    fn full_state(&self, _deadline: Duration) -> BoxFuture<'_, Result<FullState, CoreError>> {
        self.record("full_state");
        let ok = self.full_state_ok.load(Ordering::SeqCst);
        Box::pin(async move {
            if ok {
                Ok(FullState::default())
            } else {
                Err(refused())
            }
        })
    }

    fn start_daemon(
        &self,
        wake_up: bool,
        _deadline: Duration,
    ) -> BoxFuture<'_, Result<(), CoreError>> {
        self.record(format!("start?wake_up={wake_up}"));
        Box::pin(async { Ok(()) })
    }

    fn stop_daemon(
        &self,
        goto_sleep: bool,
        _deadline: Duration,
    ) -> BoxFuture<'_, Result<(), CoreError>> {
        self.record(format!("stop?goto_sleep={goto_sleep}"));
        Box::pin(async { Ok(()) })
    }

    fn running_moves(
        &self,
        _deadline: Duration,
    ) -> BoxFuture<'_, Result<Vec<RunningMove>, CoreError>> {
        self.record("running_moves");
        let moves = self.moves.lock().unwrap().clone();
        Box::pin(async move { Ok(moves) })
    }

    fn stop_current_app(&self, _deadline: Duration) -> BoxFuture<'_, Result<(), CoreError>> {
        self.record("stop-current-app");
        Box::pin(async { Ok(()) })
    }

    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, Result<Value, CoreError>> {
        self.record(format!("{} {}", request.method, request.path));
        Box::pin(async move { Ok(json!({ "path": request.path })) })
    }

    fn stream_url(&self, path: &str) -> Result<Url, CoreError> {
        let mut url = self.base_url.join(path).unwrap();
        url.set_scheme("ws").unwrap();
        Ok(url)
    }
}

pub(crate) struct FakeApiFactory {
    pub api: Arc<FakeApi>,
    pub base_urls: Mutex<Vec<Url>>,
}

impl FakeApiFactory {
    pub fn new(api: Arc<FakeApi>) -> Arc<Self> {
        Arc::new(Self {
            api,
            base_urls: Mutex::new(Vec::new()),
        })
    }
}

impl ApiFactory for FakeApiFactory {
    fn connect(&self, base_url: Url) -> Result<Arc<dyn DaemonApi>, CoreError> {
        self.base_urls.lock().unwrap().push(base_url);
        Ok(self.api.clone())
    }
}

// ── Process launcher ────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct FakeLauncher {
    launches: Mutex<Vec<LaunchSpec>>,
    sender: Mutex<Option<mpsc::Sender<ProcessSignal>>>,
    terminations: AtomicUsize,
    fail: AtomicBool,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.launches.lock().unwrap().clone()
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    /// Deliver a signal as if the launched process produced it.
    pub async fn emit(&self, signal: ProcessSignal) {
        let sender = self.sender.lock().unwrap().clone();
        sender.unwrap().send(signal).await.unwrap();
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<mpsc::Receiver<ProcessSignal>, CoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LifecycleFault::LaunchFailed {
                reason: "spawn failed".into(),
            }
            .into());
        }
        let (tx, rx) = mpsc::channel(64);
        *self.sender.lock().unwrap() = Some(tx);
        self.launches.lock().unwrap().push(spec.clone());
        Ok(rx)
    }

    fn terminate(&self) -> BoxFuture<'_, Result<(), CoreError>> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = self.sender.lock().unwrap().take() {
            let _ = tx.try_send(ProcessSignal::Terminated { code: None });
        }
        Box::pin(async { Ok(()) })
    }
}

// ── Stream connector ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Refuse,
    /// Deliver the events, then end.
    Events(Vec<StreamEvent>),
    /// Deliver the events, then stay open.
    EventsThenHang(Vec<StreamEvent>),
}

pub(crate) struct FakeConnector {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    fallback: Scripted,
    opens: Mutex<HashMap<String, usize>>,
}

impl FakeConnector {
    /// `fallback` answers every open without a scripted connection.
    pub fn new(fallback: Scripted) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            fallback,
            opens: Mutex::new(HashMap::new()),
        })
    }

    pub fn script(&self, path: &str, connections: impl IntoIterator<Item = Scripted>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(path.to_owned())
            .or_default()
            .extend(connections);
    }

    pub fn opens(&self, path: &str) -> usize {
        self.opens.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

impl StreamConnector for FakeConnector {
    fn open(&self, url: Url) -> BoxFuture<'_, Result<EventStream, CoreError>> {
        let path = url.path().to_owned();
        *self.opens.lock().unwrap().entry(path.clone()).or_default() += 1;
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&path)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.fallback.clone());
        Box::pin(async move {
            match scripted {
                Scripted::Refuse => Err(refused()),
                Scripted::Events(events) => Ok(futures_util::stream::iter(events).boxed()),
                Scripted::EventsThenHang(events) => Ok(futures_util::stream::iter(events)
                    .chain(futures_util::stream::pending())
                    .boxed()),
            }
        })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Session context around `api`, with the machine already at
/// `ReadyToStart`.
pub(crate) fn session(
    mode: ConnectionMode,
    api: Arc<dyn DaemonApi>,
    config: ConnectionConfig,
) -> (SessionContext, broadcast::Receiver<ConnectionEvent>) {
    let bus = EventBus::new(1024);
    let rx = bus.subscribe();
    let machine = StateMachine::new(bus.clone());
    let host = (mode == ConnectionMode::Remote).then(|| "reachy-mini.local".to_owned());
    machine.begin_session(mode, host).unwrap();
    let ctx = SessionContext {
        mode,
        api,
        config: Arc::new(config),
        executor: TimedExecutor::new(machine.clone()),
        machine,
        bus,
        cancel: CancellationToken::new(),
        logs: DaemonLog::new(500),
    };
    (ctx, rx)
}

/// Everything published so far.
pub(crate) fn drain(rx: &mut broadcast::Receiver<ConnectionEvent>) -> Vec<ConnectionEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

pub(crate) fn text(json: &Value) -> StreamEvent {
    StreamEvent::Text(json.to_string())
}
