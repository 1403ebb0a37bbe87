//! One-shot daemon status query.

use serde::Serialize;
use serde_json::json;

use reachylink_core::{ApiFactory, HttpApiFactory};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::commands::Target;
use crate::error::CliError;
use crate::output;

pub async fn handle(target: &Target, global: &GlobalOpts) -> Result<(), CliError> {
    let base_url = target
        .connection
        .base_url(target.mode, target.options.host.as_deref())?;
    let api = HttpApiFactory::default().connect(base_url.clone())?;
    let status = api
        .daemon_status(target.connection.status_probe_timeout)
        .await?;

    let rendered = match global.output {
        OutputFormat::Json => output::render_json_pretty(&json!({
            "url": base_url.as_str(),
            "mode": target.mode,
            "status": status,
        })),
        OutputFormat::Text => {
            let mut lines = vec![
                format!("Daemon    {base_url}"),
                format!("Mode      {}", target.mode),
                format!("State     {}", wire_name(&status.state)),
            ];
            if let Some(version) = &status.version {
                lines.push(format!("Version   {version}"));
            }
            match status.backend_error() {
                Some(error) => lines.push(format!("Backend   error: {error}")),
                None => {
                    if let Some(ready) = status.backend_status.as_ref().and_then(|b| b.ready) {
                        lines.push(format!("Backend   {}", if ready { "ready" } else { "not ready" }));
                    }
                }
            }
            lines.join("\n")
        }
    };
    output::print_output(&rendered, global.quiet);
    Ok(())
}

/// The serialized name of a unit enum variant.
fn wire_name<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(_) => "unknown".into(),
    }
}
