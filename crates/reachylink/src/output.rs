//! Output formatting: human-readable lines or one JSON object per line.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde_json::{Value, json};

use reachylink_core::{ConnectionEvent, RobotStatus, TelemetryFrame};

use crate::cli::{ColorMode, OutputFormat};

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

fn status_label(status: RobotStatus, color: bool) -> String {
    let text = status.to_string();
    if !color {
        return text;
    }
    match status {
        RobotStatus::Ready => text.green().bold().to_string(),
        RobotStatus::Crashed => text.red().bold().to_string(),
        RobotStatus::Starting | RobotStatus::Stopping | RobotStatus::Sleeping => {
            text.yellow().to_string()
        }
        RobotStatus::Busy => text.cyan().to_string(),
        RobotStatus::Disconnected | RobotStatus::ReadyToStart => text,
    }
}

fn alert(text: &str, color: bool) -> String {
    if color {
        text.red().to_string()
    } else {
        text.to_owned()
    }
}

fn dim(text: &str, color: bool) -> String {
    if color {
        text.dimmed().to_string()
    } else {
        text.to_owned()
    }
}

// ── Event rendering ──────────────────────────────────────────────────

/// What the event printer shows.
#[derive(Debug, Clone, Copy)]
pub struct EventView {
    pub format: OutputFormat,
    pub color: bool,
    /// Print every telemetry frame.
    pub telemetry: bool,
    /// Print raw daemon output lines.
    pub daemon_output: bool,
}

/// Render one event, or `None` when the view hides it.
pub fn render_event(event: &ConnectionEvent, view: EventView) -> Option<String> {
    match event {
        ConnectionEvent::HealthSuccess | ConnectionEvent::StartupDeadlineRearmed => None,
        ConnectionEvent::StateUpdated(_) if !view.telemetry => None,
        ConnectionEvent::DaemonOutput { .. } if !view.daemon_output => None,
        _ => Some(match view.format {
            OutputFormat::Text => event_line(event, view.color),
            OutputFormat::Json => render_json_compact(&event_json(event)),
        }),
    }
}

fn event_line(event: &ConnectionEvent, color: bool) -> String {
    match event {
        ConnectionEvent::StateChanged { previous, current } => {
            let mut line = format!(
                "state     {} -> {}",
                status_label(*previous, false),
                status_label(current.status, color)
            );
            if let Some(reason) = current.busy_reason {
                line.push_str(&format!(" ({reason})"));
            }
            line
        }
        ConnectionEvent::HealthSuccess => "health    ok".into(),
        ConnectionEvent::HealthFailure { kind, consecutive } => {
            format!("health    {kind} failure, {consecutive} in a row")
        }
        ConnectionEvent::StartRequested { wake_up } => {
            if *wake_up {
                "daemon    start requested (wake up)".into()
            } else {
                "daemon    start requested".into()
            }
        }
        ConnectionEvent::StartSuccess => "daemon    started".into(),
        ConnectionEvent::StartError(err) => alert(
            &format!("daemon    start failed ({}): {}", err.kind, err.message),
            color,
        ),
        ConnectionEvent::Crash { previous, reason } => alert(
            &format!("crash     daemon crashed while {previous}: {reason}"),
            color,
        ),
        ConnectionEvent::HardwareError(fault) => alert(
            &format!("hardware  {}: {}", fault.kind, fault.message),
            color,
        ),
        ConnectionEvent::DaemonOutput { stream, line } => {
            dim(&format!("{stream:<9} {line}"), color)
        }
        ConnectionEvent::StartupDeadlineRearmed => "daemon    startup deadline extended".into(),
        ConnectionEvent::StateUpdated(frame) => frame_line(frame),
        ConnectionEvent::MoveStarted { id } => format!("move      {id} started"),
        ConnectionEvent::MoveEnded { id, outcome } => format!("move      {id} {outcome}"),
        ConnectionEvent::Reset => "reset     connection closed".into(),
    }
}

fn frame_line(frame: &TelemetryFrame) -> String {
    let mut line = format!("frame     #{}", frame.version);
    if let Some(yaw) = frame.body_yaw {
        line.push_str(&format!(" body_yaw={yaw:.3}"));
    }
    if let Some([left, right]) = frame.antennas {
        line.push_str(&format!(" antennas=[{left:.3}, {right:.3}]"));
    }
    if let Some(doa) = frame.direction_of_arrival {
        line.push_str(&format!(" doa={:.2}", doa.angle));
        if doa.speech_detected {
            line.push_str(" speech");
        }
    }
    line
}

fn event_json(event: &ConnectionEvent) -> Value {
    match event {
        ConnectionEvent::StateChanged { previous, current } => json!({
            "event": "state_changed",
            "previous": previous,
            "state": current,
        }),
        ConnectionEvent::HealthSuccess => json!({ "event": "health_success" }),
        ConnectionEvent::HealthFailure { kind, consecutive } => json!({
            "event": "health_failure",
            "kind": kind,
            "consecutive": consecutive,
        }),
        ConnectionEvent::StartRequested { wake_up } => json!({
            "event": "start_requested",
            "wake_up": wake_up,
        }),
        ConnectionEvent::StartSuccess => json!({ "event": "start_success" }),
        ConnectionEvent::StartError(err) => json!({ "event": "start_error", "error": err }),
        ConnectionEvent::Crash { previous, reason } => json!({
            "event": "crash",
            "previous": previous,
            "reason": reason,
        }),
        ConnectionEvent::HardwareError(fault) => json!({ "event": "hardware_error", "fault": fault }),
        ConnectionEvent::DaemonOutput { stream, line } => json!({
            "event": "daemon_output",
            "stream": stream,
            "line": line,
        }),
        ConnectionEvent::StartupDeadlineRearmed => json!({ "event": "startup_deadline_rearmed" }),
        ConnectionEvent::StateUpdated(frame) => json!({ "event": "state_updated", "frame": frame }),
        ConnectionEvent::MoveStarted { id } => json!({ "event": "move_started", "id": id }),
        ConnectionEvent::MoveEnded { id, outcome } => json!({
            "event": "move_ended",
            "id": id,
            "outcome": outcome,
        }),
        ConnectionEvent::Reset => json!({ "event": "reset" }),
    }
}

// ── Printing ─────────────────────────────────────────────────────────

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

/// Pretty-printed JSON.
pub fn render_json_pretty<T: serde::Serialize + ?Sized>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_default()
}

/// Compact single-line JSON.
pub fn render_json_compact<T: serde::Serialize + ?Sized>(data: &T) -> String {
    serde_json::to_string(data).unwrap_or_default()
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reachylink_core::{ConnectionState, CrashReason, MoveOutcome};

    use super::*;

    fn view(format: OutputFormat) -> EventView {
        EventView {
            format,
            color: false,
            telemetry: false,
            daemon_output: false,
        }
    }

    #[test]
    fn state_change_renders_transition() {
        let event = ConnectionEvent::StateChanged {
            previous: RobotStatus::Starting,
            current: ConnectionState {
                status: RobotStatus::Ready,
                ..ConnectionState::default()
            },
        };
        let line = render_event(&event, view(OutputFormat::Text)).unwrap();
        assert_eq!(line, format!("state     {} -> {}", RobotStatus::Starting, RobotStatus::Ready));
    }

    #[test]
    fn health_success_and_frames_are_hidden_by_default() {
        assert!(render_event(&ConnectionEvent::HealthSuccess, view(OutputFormat::Text)).is_none());

        let frame = TelemetryFrame {
            version: 4,
            head_pose: None,
            head_joints: None,
            body_yaw: Some(0.5),
            passive_joints: None,
            antennas: None,
            direction_of_arrival: None,
            control_mode: None,
            timestamp_ms: 0,
        };
        let event = ConnectionEvent::StateUpdated(Arc::new(frame));
        assert!(render_event(&event, view(OutputFormat::Text)).is_none());

        let shown = EventView {
            telemetry: true,
            ..view(OutputFormat::Text)
        };
        assert_eq!(
            render_event(&event, shown).unwrap(),
            "frame     #4 body_yaw=0.500"
        );
    }

    #[test]
    fn json_events_are_tagged() {
        let event = ConnectionEvent::MoveEnded {
            id: "m1".into(),
            outcome: MoveOutcome::Completed,
        };
        let line = render_event(&event, view(OutputFormat::Json)).unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event"], "move_ended");
        assert_eq!(value["id"], "m1");
        assert_eq!(value["outcome"], "completed");

        let crash = ConnectionEvent::Crash {
            previous: RobotStatus::Ready,
            reason: CrashReason::HealthThreshold,
        };
        let value: Value =
            serde_json::from_str(&render_event(&crash, view(OutputFormat::Json)).unwrap()).unwrap();
        assert_eq!(value["event"], "crash");
    }
}
