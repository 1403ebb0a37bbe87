//! Config subcommand handlers.

use reachylink_config::{self as config, Profile};
use reachylink_core::ConnectionMode;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Show => {
            let cfg = config::load_config()?;
            let rendered = match global.output {
                OutputFormat::Json => output::render_json_pretty(&cfg),
                OutputFormat::Text => toml::to_string_pretty(&cfg).map_err(|e| CliError::Config {
                    message: format!("failed to render config: {e}"),
                })?,
            };
            output::print_output(&rendered, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::AddProfile {
            name,
            mode,
            host,
            serial_port,
            default,
        } => {
            let mode = ConnectionMode::from(mode);
            if mode == ConnectionMode::Remote && host.is_none() {
                return Err(CliError::Validation {
                    field: "profile-host".into(),
                    reason: format!("{mode} profiles require --profile-host"),
                });
            }

            let mut cfg = config::load_config()?;
            let mut profile = Profile::new(mode);
            profile.host = host;
            profile.serial_port = serial_port;
            cfg.profiles.insert(name.clone(), profile);
            if default || cfg.default_profile.is_none() {
                cfg.default_profile = Some(name.clone());
            }

            let path = config::save_config(&cfg)?;
            if !global.quiet {
                eprintln!("Saved profile '{name}' to {}", path.display());
            }
            Ok(())
        }

        ConfigCommand::RemoveProfile { name } => {
            let mut cfg = config::load_config()?;
            if cfg.profiles.remove(&name).is_none() {
                return Err(CliError::ProfileNotFound { name });
            }
            if cfg.default_profile.as_deref() == Some(name.as_str()) {
                cfg.default_profile = cfg.profiles.keys().next().cloned();
            }
            let path = config::save_config(&cfg)?;
            if !global.quiet {
                eprintln!("Removed profile '{name}' from {}", path.display());
            }
            Ok(())
        }
    }
}
