// Daemon HTTP client
//
// Wraps `reqwest::Client` with daemon-specific URL construction, per-request
// deadlines, and status/JSON handling. One client is built per session from
// the active mode's base URL; callers only ever pass relative paths.

use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::models::{DaemonStatus, FullState, RunningMove};
use crate::transport::TransportConfig;

// ── Endpoint paths ───────────────────────────────────────────────────

pub const DAEMON_STATUS_PATH: &str = "/api/daemon/status";
pub const DAEMON_START_PATH: &str = "/api/daemon/start";
pub const DAEMON_STOP_PATH: &str = "/api/daemon/stop";
pub const FULL_STATE_PATH: &str = "/api/state/full";
pub const RUNNING_MOVES_PATH: &str = "/api/move/running";
pub const STOP_CURRENT_APP_PATH: &str = "/api/apps/stop-current-app";
pub const STATE_STREAM_PATH: &str = "/api/state/ws/full";
pub const MOVE_UPDATES_PATH: &str = "/api/move/ws/updates";

/// Relative path (with query) of the telemetry stream at `frequency` Hz.
///
/// Passive joints are deliberately not requested; they are computed
/// client-side and must never be overwritten by the daemon feed.
pub fn state_stream_path(frequency: u32) -> String {
    format!(
        "{STATE_STREAM_PATH}?frequency={frequency}&with_head_pose=true&use_pose_matrix=true\
         &with_head_joints=true&with_body_yaw=true&with_antenna_positions=true&with_doa=true"
    )
}

/// Raw HTTP client for one daemon instance.
///
/// Every request carries an explicit deadline. Timeouts surface as
/// [`Error::Timeout`], non-2xx statuses as [`Error::Http`], and payload
/// shape mismatches as [`Error::Deserialization`].
#[derive(Debug, Clone)]
pub struct DaemonClient {
    http: reqwest::Client,
    base_url: Url,
}

impl DaemonClient {
    /// Create a new client from a `TransportConfig`.
    ///
    /// `base_url` is the daemon root, e.g. `http://127.0.0.1:8000`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self::with_client(transport.build_client()?, base_url))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// The daemon base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Resolve a relative path (optionally with query) against the base URL.
    pub fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    /// Resolve a relative path against the WebSocket flavour of the base URL.
    pub fn ws_url(&self, path: &str) -> Result<Url, Error> {
        let mut url = self.url(path)?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| Error::WebSocketConnect(format!("cannot derive ws url from {url}")))?;
        Ok(url)
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// `GET /api/daemon/status` -- liveness and crash-signal source.
    pub async fn daemon_status(&self, deadline: Duration) -> Result<DaemonStatus, Error> {
        self.get_json(DAEMON_STATUS_PATH, deadline).await
    }

    /// `GET /api/state/full` -- full robot-state snapshot.
    pub async fn full_state(&self, deadline: Duration) -> Result<FullState, Error> {
        self.get_json(FULL_STATE_PATH, deadline).await
    }

    /// `POST /api/daemon/start?wake_up=<bool>`.
    pub async fn start_daemon(&self, wake_up: bool, deadline: Duration) -> Result<(), Error> {
        let path = format!("{DAEMON_START_PATH}?wake_up={wake_up}");
        self.send(Method::POST, &path, None, deadline).await.map(drop)
    }

    /// `POST /api/daemon/stop?goto_sleep=<bool>`.
    pub async fn stop_daemon(&self, goto_sleep: bool, deadline: Duration) -> Result<(), Error> {
        let path = format!("{DAEMON_STOP_PATH}?goto_sleep={goto_sleep}");
        self.send(Method::POST, &path, None, deadline).await.map(drop)
    }

    /// `GET /api/move/running` -- snapshot of moves in flight.
    pub async fn running_moves(&self, deadline: Duration) -> Result<Vec<RunningMove>, Error> {
        self.get_json(RUNNING_MOVES_PATH, deadline).await
    }

    /// `POST /api/apps/stop-current-app`.
    pub async fn stop_current_app(&self, deadline: Duration) -> Result<(), Error> {
        self.send(Method::POST, STOP_CURRENT_APP_PATH, None, deadline)
            .await
            .map(drop)
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Send an arbitrary request and return the decoded JSON body.
    ///
    /// An empty body decodes to `Value::Null`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        deadline: Duration,
    ) -> Result<serde_json::Value, Error> {
        let text = self.send(method, path, body, deadline).await?;
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        decode(&text)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        deadline: Duration,
    ) -> Result<T, Error> {
        let text = self.send(Method::GET, path, None, deadline).await?;
        decode(&text)
    }

    /// Send a request with a deadline and return the raw body on 2xx.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        deadline: Duration,
    ) -> Result<String, Error> {
        let url = self.url(path)?;
        debug!("{method} {url}");

        let mut builder = self.http.request(method, url).timeout(deadline);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| map_transport(e, deadline))?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let text = resp.text().await.map_err(|e| map_transport(e, deadline))?;
        trace!(bytes = text.len(), "response body received");
        Ok(text)
    }
}

fn map_transport(err: reqwest::Error, deadline: Duration) -> Error {
    if err.is_timeout() {
        Error::Timeout {
            timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        Error::Transport(err)
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, Error> {
    serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        Error::Deserialization {
            message: format!("{e} (body preview: {preview:?})"),
            body: body.to_owned(),
        }
    })
}
