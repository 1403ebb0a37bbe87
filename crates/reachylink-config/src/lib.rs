//! Shared configuration for reachylink consumers.
//!
//! TOML profiles (one per robot), layered with `REACHYLINK_*` environment
//! overrides, and translation to `reachylink_core::ConnectionConfig`.
//! The CLI adds flag-aware wrappers on top.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use reachylink_core::{ConnectOptions, ConnectionConfig, ConnectionMode, LaunchConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

    #[error("no profile selected and no default_profile configured")]
    NoProfile,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named.
    pub default_profile: Option<String>,

    /// Tuning shared by every profile.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named robot profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

/// Connection tuning. Durations are in milliseconds unless the field
/// name says otherwise.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Defaults {
    pub port: u16,
    pub health_interval_ms: u64,
    pub health_timeout_ms: u64,
    pub crash_threshold: u32,
    pub startup_timeout_secs: u64,
    pub startup_timeout_simulated_secs: u64,
    pub stop_grace_ms: u64,
    pub stream_frequency: u32,
    pub reconnect_attempts_local: u32,
    pub reconnect_attempts_remote: u32,
    pub reconnect_delay_ms: u64,
    /// Daemon executable for the local modes.
    pub daemon_program: PathBuf,
    pub daemon_args: Vec<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        let core = ConnectionConfig::default();
        Self {
            port: core.daemon_port,
            health_interval_ms: millis(core.health_interval),
            health_timeout_ms: millis(core.health_request_timeout),
            crash_threshold: core.crash_threshold,
            startup_timeout_secs: core.startup_timeout.as_secs(),
            startup_timeout_simulated_secs: core.startup_timeout_simulated.as_secs(),
            stop_grace_ms: millis(core.stop_grace_period),
            stream_frequency: core.stream_frequency,
            reconnect_attempts_local: core.max_reconnect_attempts_local,
            reconnect_attempts_remote: core.max_reconnect_attempts_remote,
            reconnect_delay_ms: millis(core.stream_reconnect_delay),
            daemon_program: core.launch.program,
            daemon_args: core.launch.args,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// A named robot profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// "direct", "remote", or "simulated".
    pub mode: String,

    /// Robot hostname or address (remote mode).
    pub host: Option<String>,

    /// Serial device (direct mode), e.g. "/dev/ttyACM0". Detected over
    /// USB when unset.
    pub serial_port: Option<String>,

    /// Override the daemon port.
    pub port: Option<u16>,
}

impl Profile {
    pub fn new(mode: ConnectionMode) -> Self {
        Self {
            mode: mode.to_string(),
            host: None,
            serial_port: None,
            port: None,
        }
    }
}

impl Config {
    /// Look up `name`, falling back to `default_profile`.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .ok_or(ConfigError::NoProfile)?;
        self.profiles
            .get(name)
            .map(|p| (name.to_owned(), p))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.to_owned(),
            })
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "reachylink", "reachylink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("reachylink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Environment keys nest with a double underscore:
/// `REACHYLINK_DEFAULTS__PORT=8080`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("REACHYLINK_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Everything needed to open a connection from a profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProfile {
    pub name: String,
    pub mode: ConnectionMode,
    pub options: ConnectOptions,
    pub connection: ConnectionConfig,
}

/// Parse a mode name ("direct", "remote", "simulated").
pub fn parse_mode(raw: &str) -> Result<ConnectionMode, ConfigError> {
    ConnectionMode::from_str(&raw.to_ascii_lowercase()).map_err(|_| ConfigError::Validation {
        field: "mode".into(),
        reason: format!("expected 'direct', 'remote', or 'simulated', got '{raw}'"),
    })
}

/// Build the core connection settings from the `[defaults]` table.
pub fn defaults_to_connection_config(defaults: &Defaults) -> Result<ConnectionConfig, ConfigError> {
    let config = ConnectionConfig {
        daemon_port: defaults.port,
        health_interval: Duration::from_millis(defaults.health_interval_ms),
        health_request_timeout: Duration::from_millis(defaults.health_timeout_ms),
        crash_threshold: defaults.crash_threshold,
        startup_timeout: Duration::from_secs(defaults.startup_timeout_secs),
        startup_timeout_simulated: Duration::from_secs(defaults.startup_timeout_simulated_secs),
        stop_grace_period: Duration::from_millis(defaults.stop_grace_ms),
        stream_frequency: defaults.stream_frequency,
        max_reconnect_attempts_local: defaults.reconnect_attempts_local,
        max_reconnect_attempts_remote: defaults.reconnect_attempts_remote,
        stream_reconnect_delay: Duration::from_millis(defaults.reconnect_delay_ms),
        launch: LaunchConfig {
            program: defaults.daemon_program.clone(),
            args: defaults.daemon_args.clone(),
        },
        ..ConnectionConfig::default()
    };
    config.validate().map_err(|e| ConfigError::Validation {
        field: "defaults".into(),
        reason: e.to_string(),
    })?;
    Ok(config)
}

/// Resolve a profile into connect parameters and core settings.
pub fn resolve_profile(cfg: &Config, name: Option<&str>) -> Result<ResolvedProfile, ConfigError> {
    let (name, profile) = cfg.profile(name)?;
    let mode = parse_mode(&profile.mode)?;

    let options = match mode {
        // Without a serial port the robot is looked up on USB at connect time.
        ConnectionMode::Direct => ConnectOptions {
            serial_port: profile
                .serial_port
                .clone()
                .filter(|port| !port.trim().is_empty()),
            host: None,
        },
        ConnectionMode::Remote => {
            ConnectOptions::remote(required(profile.host.as_deref(), "host", &name)?)
        }
        ConnectionMode::Simulated => ConnectOptions::simulated(),
    };

    let mut connection = defaults_to_connection_config(&cfg.defaults)?;
    if let Some(port) = profile.port {
        connection.daemon_port = port;
    }

    Ok(ResolvedProfile {
        name,
        mode,
        options,
        connection,
    })
}

fn required<'a>(value: Option<&'a str>, field: &str, profile: &str) -> Result<&'a str, ConfigError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::Validation {
            field: field.into(),
            reason: format!("profile '{profile}' needs a {field}"),
        })
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const SAMPLE: &str = r#"
default_profile = "desk"

[defaults]
health_interval_ms = 3000
stream_frequency = 10

[profiles.desk]
mode = "direct"
serial_port = "/dev/ttyACM0"

[profiles.wifi]
mode = "remote"
host = "reachy-mini.local"
port = 8080

[profiles.usb]
mode = "direct"

[profiles.broken]
mode = "remote"
"#;

    fn write(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(cfg.defaults, Defaults::default());
        assert!(cfg.profiles.is_empty());
        assert!(matches!(cfg.profile(None), Err(ConfigError::NoProfile)));
    }

    #[test]
    fn file_values_override_defaults() {
        let (_dir, path) = write(SAMPLE);
        let cfg = load_config_from(&path).unwrap();

        assert_eq!(cfg.defaults.health_interval_ms, 3000);
        assert_eq!(cfg.defaults.stream_frequency, 10);
        assert_eq!(cfg.defaults.health_timeout_ms, 1330);
        assert_eq!(cfg.profiles.len(), 4);
    }

    #[test]
    fn default_profile_resolves_to_direct() {
        let (_dir, path) = write(SAMPLE);
        let cfg = load_config_from(&path).unwrap();

        let resolved = resolve_profile(&cfg, None).unwrap();
        assert_eq!(resolved.name, "desk");
        assert_eq!(resolved.mode, ConnectionMode::Direct);
        assert_eq!(resolved.options, ConnectOptions::direct("/dev/ttyACM0"));
        assert_eq!(resolved.connection.health_interval, Duration::from_secs(3));
        assert_eq!(resolved.connection.stream_frequency, 10);
    }

    #[test]
    fn direct_profile_may_leave_serial_port_unset() {
        let (_dir, path) = write(SAMPLE);
        let cfg = load_config_from(&path).unwrap();

        let resolved = resolve_profile(&cfg, Some("usb")).unwrap();
        assert_eq!(resolved.mode, ConnectionMode::Direct);
        assert_eq!(resolved.options, ConnectOptions::default());
    }

    #[test]
    fn named_profile_applies_port_override() {
        let (_dir, path) = write(SAMPLE);
        let cfg = load_config_from(&path).unwrap();

        let resolved = resolve_profile(&cfg, Some("wifi")).unwrap();
        assert_eq!(resolved.mode, ConnectionMode::Remote);
        assert_eq!(resolved.connection.daemon_port, 8080);
        assert_eq!(
            resolved
                .connection
                .base_url(resolved.mode, resolved.options.host.as_deref())
                .unwrap()
                .as_str(),
            "http://reachy-mini.local:8080/"
        );
    }

    #[test]
    fn remote_profile_without_host_is_rejected() {
        let (_dir, path) = write(SAMPLE);
        let cfg = load_config_from(&path).unwrap();

        let err = resolve_profile(&cfg, Some("broken")).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "host"));
        assert!(matches!(
            resolve_profile(&cfg, Some("nope")),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn inconsistent_health_timings_are_rejected() {
        let defaults = Defaults {
            health_interval_ms: 1000,
            health_timeout_ms: 1330,
            ..Defaults::default()
        };
        let err = defaults_to_connection_config(&defaults).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "defaults"));
    }

    #[test]
    fn modes_parse_case_insensitively() {
        assert_eq!(parse_mode("Simulated").unwrap(), ConnectionMode::Simulated);
        assert!(matches!(parse_mode("usb"), Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config {
            default_profile: Some("sim".into()),
            ..Config::default()
        };
        cfg.profiles
            .insert("sim".into(), Profile::new(ConnectionMode::Simulated));

        save_config_to(&cfg, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        assert_eq!(loaded, cfg);
        assert_eq!(
            resolve_profile(&loaded, None).unwrap().options,
            ConnectOptions::simulated()
        );
    }
}
