// ── Backend seams ──
//
// The three boundaries between the connection layer and the outside
// world: the daemon HTTP API, the local process launcher, and the
// streaming connector. Production implementations wrap
// `reachylink_api`; tests substitute scripted fakes.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use reachylink_api::websocket::{self, EventStream};
use reachylink_api::{DaemonClient, DaemonStatus, FullState, Method, RunningMove, TransportConfig};
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use crate::error::CoreError;
use crate::event::OutputStream;

// ── Daemon API ──────────────────────────────────────────────────────

/// A caller-supplied request against the active daemon.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub method: Method,
    /// Path relative to the daemon root, e.g. `/api/move/goto`.
    pub path: String,
    pub body: Option<Value>,
    pub deadline: Duration,
    pub skip_when_busy: bool,
}

impl FetchRequest {
    const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            deadline: Self::DEFAULT_DEADLINE,
            skip_when_busy: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn skip_when_busy(mut self) -> Self {
        self.skip_when_busy = true;
        self
    }

    /// Callers never build absolute URLs; only root-relative paths pass.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.path.starts_with('/') || self.path.starts_with("//") {
            return Err(CoreError::InvalidOptions {
                message: format!("fetch path must be relative to the daemon root: {}", self.path),
            });
        }
        Ok(())
    }
}

/// Daemon endpoints used by the connection layer.
pub trait DaemonApi: Send + Sync {
    fn base_url(&self) -> &Url;

    fn daemon_status(&self, deadline: Duration) -> BoxFuture<'_, Result<DaemonStatus, CoreError>>;

    fn full_state(&self, deadline: Duration) -> BoxFuture<'_, Result<FullState, CoreError>>;

    fn start_daemon(&self, wake_up: bool, deadline: Duration)
    -> BoxFuture<'_, Result<(), CoreError>>;

    fn stop_daemon(
        &self,
        goto_sleep: bool,
        deadline: Duration,
    ) -> BoxFuture<'_, Result<(), CoreError>>;

    fn running_moves(&self, deadline: Duration)
    -> BoxFuture<'_, Result<Vec<RunningMove>, CoreError>>;

    fn stop_current_app(&self, deadline: Duration) -> BoxFuture<'_, Result<(), CoreError>>;

    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, Result<Value, CoreError>>;

    /// WebSocket URL for a relative stream path.
    fn stream_url(&self, path: &str) -> Result<Url, CoreError>;
}

impl DaemonApi for DaemonClient {
    fn base_url(&self) -> &Url {
        DaemonClient::base_url(self)
    }

    fn daemon_status(&self, deadline: Duration) -> BoxFuture<'_, Result<DaemonStatus, CoreError>> {
        Box::pin(async move {
            DaemonClient::daemon_status(self, deadline)
                .await
                .map_err(CoreError::from)
        })
    }

    fn full_state(&self, deadline: Duration) -> BoxFuture<'_, Result<FullState, CoreError>> {
        Box::pin(async move {
            DaemonClient::full_state(self, deadline)
                .await
                .map_err(CoreError::from)
        })
    }

    fn start_daemon(
        &self,
        wake_up: bool,
        deadline: Duration,
    ) -> BoxFuture<'_, Result<(), CoreError>> {
        Box::pin(async move {
            DaemonClient::start_daemon(self, wake_up, deadline)
                .await
                .map_err(CoreError::from)
        })
    }

    fn stop_daemon(
        &self,
        goto_sleep: bool,
        deadline: Duration,
    ) -> BoxFuture<'_, Result<(), CoreError>> {
        Box::pin(async move {
            DaemonClient::stop_daemon(self, goto_sleep, deadline)
                .await
                .map_err(CoreError::from)
        })
    }

    fn running_moves(
        &self,
        deadline: Duration,
    ) -> BoxFuture<'_, Result<Vec<RunningMove>, CoreError>> {
        Box::pin(async move {
            DaemonClient::running_moves(self, deadline)
                .await
                .map_err(CoreError::from)
        })
    }

    fn stop_current_app(&self, deadline: Duration) -> BoxFuture<'_, Result<(), CoreError>> {
        Box::pin(async move {
            DaemonClient::stop_current_app(self, deadline)
                .await
                .map_err(CoreError::from)
        })
    }

    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, Result<Value, CoreError>> {
        Box::pin(async move {
            self.request(
                request.method,
                &request.path,
                request.body.as_ref(),
                request.deadline,
            )
            .await
            .map_err(CoreError::from)
        })
    }

    fn stream_url(&self, path: &str) -> Result<Url, CoreError> {
        Ok(self.ws_url(path)?)
    }
}

/// Builds the per-session API once the base URL is known.
pub trait ApiFactory: Send + Sync {
    fn connect(&self, base_url: Url) -> Result<Arc<dyn DaemonApi>, CoreError>;
}

/// Production factory: one `DaemonClient` per session.
#[derive(Debug, Clone, Default)]
pub struct HttpApiFactory {
    transport: TransportConfig,
}

impl ApiFactory for HttpApiFactory {
    fn connect(&self, base_url: Url) -> Result<Arc<dyn DaemonApi>, CoreError> {
        Ok(Arc::new(DaemonClient::new(base_url, &self.transport)?))
    }
}

// ── Process launcher ────────────────────────────────────────────────

/// What to launch for a local session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub simulated: bool,
    /// Serial device for the direct mode.
    pub serial_port: Option<String>,
}

/// Inbound signal from a launched daemon process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessSignal {
    Output { stream: OutputStream, line: String },
    Terminated { code: Option<i32> },
}

/// Launch and terminate the local daemon process.
pub trait ProcessLauncher: Send + Sync {
    /// Spawn the daemon. Output lines and the final exit arrive on the
    /// returned channel.
    fn launch(&self, spec: &LaunchSpec) -> Result<mpsc::Receiver<ProcessSignal>, CoreError>;

    /// Terminate the process started by the last `launch`, if any.
    fn terminate(&self) -> BoxFuture<'_, Result<(), CoreError>>;
}

// ── Stream connector ────────────────────────────────────────────────

/// Opens one streaming connection.
pub trait StreamConnector: Send + Sync {
    fn open(&self, url: Url) -> BoxFuture<'_, Result<EventStream, CoreError>>;
}

/// Production connector over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl StreamConnector for WebSocketConnector {
    fn open(&self, url: Url) -> BoxFuture<'_, Result<EventStream, CoreError>> {
        Box::pin(async move {
            websocket::open(&url)
                .await
                .map_err(CoreError::from)
        })
    }
}
