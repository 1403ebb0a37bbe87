//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use reachylink_config::ConfigError;
use reachylink_core::{CoreError, LifecycleFault};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach the robot at {host}")]
    #[diagnostic(
        code(reachylink::unreachable),
        help(
            "Check that the robot is powered on and on the same network.\n\
             Try: reachylink status --mode remote --host {host}"
        )
    )]
    Unreachable { host: String, reason: String },

    #[error("Daemon request failed: {reason}")]
    #[diagnostic(
        code(reachylink::connection_failed),
        help("Check that the daemon is running and listening on the configured port.")
    )]
    ConnectionFailed { reason: String },

    #[error("Daemon failed to start: {reason}")]
    #[diagnostic(
        code(reachylink::startup_failed),
        help("Run with -v to see the daemon output.")
    )]
    StartupFailed { reason: String },

    // ── Timeout ──────────────────────────────────────────────────────

    #[error("{operation} timed out after {timeout_ms}ms")]
    #[diagnostic(
        code(reachylink::timeout),
        help("The daemon may be overloaded or still starting. Try again shortly.")
    )]
    Timeout { operation: String, timeout_ms: u64 },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(reachylink::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(reachylink::profile_not_found),
        help("List profiles with: reachylink config show")
    )]
    ProfileNotFound { name: String },

    #[error("No robot profile selected")]
    #[diagnostic(
        code(reachylink::no_profile),
        help(
            "Pass --mode (and --host or --serial-port), or create a profile with:\n\
             reachylink config add-profile <NAME> --profile-mode simulated --default\n\
             Config file: {path}"
        )
    )]
    NoProfile { path: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(reachylink::config))]
    Config { message: String },

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to encode output: {0}")]
    #[diagnostic(code(reachylink::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unreachable { .. } | Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            Self::ProfileNotFound { .. } | Self::NoProfile { .. } => exit_code::NOT_FOUND,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::WifiConnection { host, reason } => CliError::Unreachable { host, reason },

            CoreError::TransportTimeout {
                operation,
                timeout_ms,
            } => CliError::Timeout {
                operation,
                timeout_ms,
            },

            CoreError::Lifecycle(LifecycleFault::StartupTimeout { timeout_secs }) => {
                CliError::Timeout {
                    operation: "daemon startup".into(),
                    timeout_ms: timeout_secs.saturating_mul(1000),
                }
            }

            CoreError::Lifecycle(fault) => CliError::StartupFailed {
                reason: fault.to_string(),
            },

            CoreError::InvalidOptions { message } => CliError::Validation {
                field: "connection options".into(),
                reason: message,
            },

            CoreError::Config { message } => CliError::Config { message },

            other @ (CoreError::Transport { .. }
            | CoreError::HttpStatus { .. }
            | CoreError::Protocol { .. }
            | CoreError::BackendFault { .. }
            | CoreError::Hardware(_)
            | CoreError::InvalidTransition { .. }
            | CoreError::NotConnected) => CliError::ConnectionFailed {
                reason: other.to_string(),
            },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::UnknownProfile { profile } => CliError::ProfileNotFound { name: profile },
            ConfigError::NoProfile => CliError::NoProfile {
                path: reachylink_config::config_path().display().to_string(),
            },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}
