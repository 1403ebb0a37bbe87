// ── Core error types ──
//
// Connection-level taxonomy. Consumers never match on reqwest or
// tungstenite errors; `From<reachylink_api::Error>` folds transport
// failures into the variants below.

use thiserror::Error;

use crate::model::{HardwareFault, RobotStatus};

/// Failure of the daemon process lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleFault {
    #[error("daemon did not become ready within {timeout_secs}s")]
    StartupTimeout { timeout_secs: u64 },

    #[error("daemon process exited (code {})", code.map_or_else(|| "none".to_owned(), |c| c.to_string()))]
    Exited { code: Option<i32> },

    #[error("failed to launch daemon: {reason}")]
    LaunchFailed { reason: String },
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Transport errors ─────────────────────────────────────────────
    #[error("{operation} timed out after {timeout_ms}ms")]
    TransportTimeout { operation: String, timeout_ms: u64 },

    #[error("Transport error: {reason}")]
    Transport { reason: String },

    #[error("Daemon returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Cannot reach robot at {host}: {reason}")]
    WifiConnection { host: String, reason: String },

    // ── Daemon errors ────────────────────────────────────────────────
    #[error("Unexpected daemon payload: {message}")]
    Protocol { message: String },

    #[error("Daemon backend error: {message}")]
    BackendFault { message: String },

    #[error("Hardware error: {}", .0.message)]
    Hardware(HardwareFault),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleFault),

    // ── Caller errors ────────────────────────────────────────────────
    #[error("Invalid transition {from} -> {to}")]
    InvalidTransition { from: RobotStatus, to: RobotStatus },

    #[error("Invalid connection options: {message}")]
    InvalidOptions { message: String },

    #[error("Not connected to a daemon")]
    NotConnected,

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Whether the failure is a missed deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TransportTimeout { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<reachylink_api::Error> for CoreError {
    fn from(err: reachylink_api::Error) -> Self {
        match err {
            reachylink_api::Error::Timeout { timeout_ms } => CoreError::TransportTimeout {
                operation: "request".into(),
                timeout_ms,
            },
            reachylink_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::TransportTimeout {
                        operation: "request".into(),
                        timeout_ms: 0,
                    }
                } else {
                    CoreError::Transport {
                        reason: e.to_string(),
                    }
                }
            }
            reachylink_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            reachylink_api::Error::Http { status, body } => CoreError::HttpStatus { status, body },
            reachylink_api::Error::Deserialization { message, body: _ } => {
                CoreError::Protocol { message }
            }
            reachylink_api::Error::WebSocketConnect(reason) => CoreError::Transport {
                reason: format!("WebSocket connection failed: {reason}"),
            },
        }
    }
}
