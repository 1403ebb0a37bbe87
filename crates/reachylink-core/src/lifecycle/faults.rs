// ── Hardware fault classification ──
//
// Daemon stderr lines are matched against a fixed table of known
// hardware failure signatures. During startup, anything that looks fatal
// but matches no entry becomes an `Unclassified` fault, unless a fault is
// already attached. Once the daemon is up, generic errors are only logged.

use crate::model::{HardwareFault, HardwareFaultKind};

struct FaultPattern {
    /// Lower-case substrings that must all appear in the line.
    needles: &'static [&'static str],
    kind: HardwareFaultKind,
    message: &'static str,
}

const FAULT_TABLE: &[FaultPattern] = &[
    FaultPattern {
        needles: &["no reachy mini serial port found"],
        kind: HardwareFaultKind::NoSerialPort,
        message: "Robot not detected on USB. Check the cable and that the robot is powered on.",
    },
    FaultPattern {
        needles: &["permission denied", "/dev/"],
        kind: HardwareFaultKind::SerialPermission,
        message: "No permission to open the robot's serial port. Add your user to the dialout group.",
    },
    FaultPattern {
        needles: &["could not exclusively lock port"],
        kind: HardwareFaultKind::SerialPortBusy,
        message: "The robot's serial port is used by another program. Close it and retry.",
    },
    FaultPattern {
        needles: &["resource busy"],
        kind: HardwareFaultKind::SerialPortBusy,
        message: "The robot's serial port is used by another program. Close it and retry.",
    },
    FaultPattern {
        needles: &["motor", "not responding"],
        kind: HardwareFaultKind::MotorCommunication,
        message: "A motor is not responding. Check the motor cables and power supply.",
    },
    FaultPattern {
        needles: &["missing motor"],
        kind: HardwareFaultKind::MotorCommunication,
        message: "A motor is not responding. Check the motor cables and power supply.",
    },
    FaultPattern {
        needles: &["input/output error"],
        kind: HardwareFaultKind::UsbDisconnected,
        message: "The USB connection to the robot was lost.",
    },
    FaultPattern {
        needles: &["no camera found"],
        kind: HardwareFaultKind::CameraUnavailable,
        message: "The robot's camera was not found.",
    },
];

const FATAL_MARKERS: &[&str] = &[
    "traceback (most recent call last)",
    "critical",
    "fatal",
    "runtimeerror",
];

/// Match a line against the known hardware fault signatures.
pub fn classify(line: &str) -> Option<HardwareFault> {
    let lower = line.to_lowercase();
    FAULT_TABLE
        .iter()
        .find(|p| p.needles.iter().all(|n| lower.contains(n)))
        .map(|p| HardwareFault {
            kind: p.kind,
            message: p.message.to_owned(),
            line: line.trim().to_owned(),
        })
}

/// Whether a line looks like a fatal error of any kind.
pub fn is_fatal(line: &str) -> bool {
    let lower = line.to_lowercase();
    FATAL_MARKERS.iter().any(|m| lower.contains(m))
}

/// Classify a stderr line given the fault already attached, if any.
/// Generic fatal lines only count while `starting`.
pub fn classify_output(
    line: &str,
    existing: Option<&HardwareFault>,
    starting: bool,
) -> Option<HardwareFault> {
    if let Some(fault) = classify(line) {
        return Some(fault);
    }
    if starting && existing.is_none() && is_fatal(line) {
        return Some(HardwareFault {
            kind: HardwareFaultKind::Unclassified,
            message: "The daemon reported a fatal error. See the daemon logs for details.".into(),
            line: line.trim().to_owned(),
        });
    }
    None
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_patterns() {
        let cases = [
            (
                "RuntimeError: No Reachy Mini serial port found.",
                HardwareFaultKind::NoSerialPort,
            ),
            (
                "serial.SerialException: [Errno 13] could not open port /dev/ttyACM0: Permission denied",
                HardwareFaultKind::SerialPermission,
            ),
            (
                "Could not exclusively lock port /dev/ttyACM0",
                HardwareFaultKind::SerialPortBusy,
            ),
            (
                "ERROR motor 12 not responding",
                HardwareFaultKind::MotorCommunication,
            ),
            (
                "OSError: [Errno 5] Input/output error",
                HardwareFaultKind::UsbDisconnected,
            ),
        ];
        for (line, kind) in cases {
            assert_eq!(classify(line).map(|f| f.kind), Some(kind), "line: {line}");
        }
    }

    #[test]
    fn ordinary_output_is_not_a_fault() {
        assert!(classify("INFO: Uvicorn running on http://0.0.0.0:8000").is_none());
        assert!(classify_output("INFO: Application startup complete.", None, true).is_none());
    }

    #[test]
    fn generic_fatal_only_without_existing_fault() {
        let fatal = "Traceback (most recent call last):";
        let fault = classify_output(fatal, None, true);
        assert_eq!(fault.as_ref().map(|f| f.kind), Some(HardwareFaultKind::Unclassified));

        let existing = classify("No Reachy Mini serial port found");
        assert!(existing.is_some());
        assert!(classify_output(fatal, existing.as_ref(), true).is_none());
    }

    #[test]
    fn generic_fatal_is_ignored_once_running() {
        assert!(classify_output("Traceback (most recent call last):", None, false).is_none());
        assert!(classify_output("CRITICAL: camera frame dropped", None, false).is_none());
        assert_eq!(
            classify_output("ERROR motor 3 not responding", None, false).map(|f| f.kind),
            Some(HardwareFaultKind::MotorCommunication)
        );
    }

    #[test]
    fn specific_pattern_overrides_existing_fault() {
        let existing = classify_output("CRITICAL: something broke", None, true);
        let fault = classify_output("Missing motor 14", existing.as_ref(), true);
        assert_eq!(fault.map(|f| f.kind), Some(HardwareFaultKind::MotorCommunication));
    }

    #[test]
    fn user_message_and_raw_line_are_kept() {
        let fault = classify("  No Reachy Mini serial port found  ").map(|f| (f.message, f.line));
        let (message, line) = fault.unwrap_or_default();
        assert!(message.contains("USB"));
        assert_eq!(line, "No Reachy Mini serial port found");
    }
}
