// ── Runtime connection configuration ──
//
// Describes *how* to reach and supervise the daemon. Never touches disk:
// the CLI (via `reachylink-config`) builds a `ConnectionConfig` and
// hands it in.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::CoreError;
use crate::model::ConnectionMode;

/// How the local daemon process is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Daemon executable.
    pub program: PathBuf,
    /// Arguments passed before the mode-specific flags.
    pub args: Vec<String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("reachy-mini-daemon"),
            args: vec!["--desktop-app-daemon".into()],
        }
    }
}

/// Tuning for one connection. All deadlines are per request.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Daemon HTTP port, shared by all modes.
    pub daemon_port: u16,
    /// Host used by the local modes.
    pub local_host: String,

    // ── Health ───────────────────────────────────────────────────────
    /// Deadline of one liveness probe.
    pub health_request_timeout: Duration,
    /// Poll interval. Must be strictly greater than the probe deadline.
    pub health_interval: Duration,
    /// Consecutive failures that declare the daemon crashed.
    pub crash_threshold: u32,

    // ── Lifecycle ────────────────────────────────────────────────────
    /// Deadline of the startup status probes.
    pub status_probe_timeout: Duration,
    /// Deadline of the already-running fast-path probe.
    pub state_probe_timeout: Duration,
    /// Deadline of start, stop, and app-stop commands.
    pub command_timeout: Duration,
    /// Startup deadline for the direct and remote modes.
    pub startup_timeout: Duration,
    /// Startup deadline for the simulated mode.
    pub startup_timeout_simulated: Duration,
    /// Minimum spacing between two startup-deadline re-arms.
    pub startup_rearm_min_interval: Duration,
    /// Readiness poll interval while starting.
    pub startup_poll_interval: Duration,
    /// Wait between stopping the running app and stopping the daemon.
    pub stop_grace_period: Duration,
    /// Wait between the stop call and the final reset.
    pub reset_delay: Duration,
    pub launch: LaunchConfig,
    /// Daemon output lines kept for `Connection::daemon_logs`.
    pub log_capacity: usize,

    // ── Streams ──────────────────────────────────────────────────────
    /// Telemetry rate requested from the daemon, in Hz.
    pub stream_frequency: u32,
    pub stream_reconnect_delay: Duration,
    pub max_reconnect_attempts_local: u32,
    pub max_reconnect_attempts_remote: u32,
    /// Deadline of the one-shot running-moves seed request.
    pub moves_seed_timeout: Duration,

    /// Capacity of the event bus before slow subscribers start lagging.
    pub event_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            daemon_port: 8000,
            local_host: "127.0.0.1".into(),
            health_request_timeout: Duration::from_millis(1330),
            health_interval: Duration::from_millis(2500),
            crash_threshold: 3,
            status_probe_timeout: Duration::from_secs(3),
            state_probe_timeout: Duration::from_secs(2),
            command_timeout: Duration::from_secs(5),
            startup_timeout: Duration::from_secs(60),
            startup_timeout_simulated: Duration::from_secs(120),
            startup_rearm_min_interval: Duration::from_secs(2),
            startup_poll_interval: Duration::from_secs(1),
            stop_grace_period: Duration::from_secs(4),
            reset_delay: Duration::from_millis(500),
            launch: LaunchConfig::default(),
            log_capacity: 500,
            stream_frequency: 20,
            stream_reconnect_delay: Duration::from_secs(1),
            max_reconnect_attempts_local: 5,
            max_reconnect_attempts_remote: 3,
            moves_seed_timeout: Duration::from_secs(3),
            event_capacity: 256,
        }
    }
}

impl ConnectionConfig {
    /// Reject combinations that would produce false crash detection or
    /// a stream that can never start.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.health_interval <= self.health_request_timeout {
            return Err(CoreError::Config {
                message: format!(
                    "health interval ({}ms) must be greater than the health request timeout ({}ms)",
                    self.health_interval.as_millis(),
                    self.health_request_timeout.as_millis()
                ),
            });
        }
        if self.crash_threshold == 0 {
            return Err(CoreError::Config {
                message: "crash threshold must be at least 1".into(),
            });
        }
        if self.stream_frequency == 0 {
            return Err(CoreError::Config {
                message: "stream frequency must be at least 1 Hz".into(),
            });
        }
        if self.max_reconnect_attempts_local == 0 || self.max_reconnect_attempts_remote == 0 {
            return Err(CoreError::Config {
                message: "reconnect attempt caps must be at least 1".into(),
            });
        }
        if self.event_capacity == 0 || self.log_capacity == 0 {
            return Err(CoreError::Config {
                message: "event and log capacities must be non-zero".into(),
            });
        }
        Ok(())
    }

    pub fn startup_timeout_for(&self, mode: ConnectionMode) -> Duration {
        match mode {
            ConnectionMode::Simulated => self.startup_timeout_simulated,
            ConnectionMode::Direct | ConnectionMode::Remote => self.startup_timeout,
        }
    }

    pub fn max_reconnect_attempts(&self, mode: ConnectionMode) -> u32 {
        if mode.is_local() {
            self.max_reconnect_attempts_local
        } else {
            self.max_reconnect_attempts_remote
        }
    }

    /// Daemon base URL for a mode. Remote mode requires `host`.
    pub fn base_url(&self, mode: ConnectionMode, host: Option<&str>) -> Result<Url, CoreError> {
        let host = match mode {
            ConnectionMode::Remote => host.ok_or_else(|| CoreError::InvalidOptions {
                message: "remote mode requires a host".into(),
            })?,
            ConnectionMode::Direct | ConnectionMode::Simulated => self.local_host.as_str(),
        };
        let raw = format!("http://{host}:{}", self.daemon_port);
        Url::parse(&raw).map_err(|e| CoreError::Config {
            message: format!("Invalid daemon URL {raw}: {e}"),
        })
    }
}
