//! Command handlers and robot target resolution.

pub mod config_cmd;
pub mod connect;
pub mod status;

use reachylink_config::{defaults_to_connection_config, load_config, resolve_profile};
use reachylink_core::{ConnectOptions, ConnectionConfig, ConnectionMode};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Which robot to talk to, and how.
#[derive(Debug, Clone)]
pub struct Target {
    /// Profile the target came from; `None` when built from flags alone.
    pub profile: Option<String>,
    pub mode: ConnectionMode,
    pub options: ConnectOptions,
    pub connection: ConnectionConfig,
}

/// Build the target from the config file, profile, and CLI overrides.
///
/// `--mode` bypasses profiles entirely; `--host`, `--serial-port` and
/// `--port` override whichever source was used. A direct target without
/// a serial port uses the robot detected on USB.
pub fn resolve_target(global: &GlobalOpts) -> Result<Target, CliError> {
    let cfg = load_config()?;

    let mut target = if let Some(mode) = global.mode {
        Target {
            profile: None,
            mode: mode.into(),
            options: ConnectOptions::default(),
            connection: defaults_to_connection_config(&cfg.defaults)?,
        }
    } else {
        let resolved = resolve_profile(&cfg, global.profile.as_deref())?;
        Target {
            profile: Some(resolved.name),
            mode: resolved.mode,
            options: resolved.options,
            connection: resolved.connection,
        }
    };

    if let Some(host) = &global.host {
        target.options.host = Some(host.clone());
    }
    if let Some(serial_port) = &global.serial_port {
        target.options.serial_port = Some(serial_port.clone());
    }
    if let Some(port) = global.port {
        target.connection.daemon_port = port;
    }

    complete_options(&mut target, reachylink_core::detect_robot_port)?;

    tracing::debug!(profile = ?target.profile, mode = %target.mode, "resolved target");
    Ok(target)
}

/// Fill in what the mode still lacks. Direct mode falls back to the
/// robot found by `detect` on USB.
fn complete_options(
    target: &mut Target,
    detect: impl FnOnce() -> Option<String>,
) -> Result<(), CliError> {
    match target.mode {
        ConnectionMode::Remote if is_blank(target.options.host.as_deref()) => {
            Err(CliError::Validation {
                field: "host".into(),
                reason: format!("{} mode requires --host", target.mode),
            })
        }
        ConnectionMode::Direct if is_blank(target.options.serial_port.as_deref()) => {
            let port = detect().ok_or_else(|| CliError::Validation {
                field: "serial-port".into(),
                reason: format!(
                    "{} mode requires --serial-port (no robot detected on USB)",
                    target.mode
                ),
            })?;
            tracing::info!(port = %port, "using robot detected on USB");
            target.options.serial_port = Some(port);
            Ok(())
        }
        _ => Ok(()),
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}
