// ── Fault records ──
//
// Hardware faults come from classifying daemon output; start errors are
// what the UI shows when a startup attempt did not reach `Ready`.

use serde::{Deserialize, Serialize};
use strum::Display;

/// Category of a hardware fault recognised in daemon output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HardwareFaultKind {
    NoSerialPort,
    SerialPermission,
    SerialPortBusy,
    MotorCommunication,
    UsbDisconnected,
    CameraUnavailable,
    /// Generic fatal output that matched no known pattern.
    Unclassified,
}

/// A hardware fault attached to the connection state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareFault {
    pub kind: HardwareFaultKind,
    /// User-facing explanation.
    pub message: String,
    /// The daemon output line that triggered the classification.
    pub line: String,
}

/// Category of a failed startup attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StartErrorKind {
    /// The remote daemon could not be reached over the network.
    WifiConnection,
    /// The daemon did not become ready before the startup deadline.
    StartupTimeout,
    /// The daemon process exited before becoming ready.
    ProcessExited,
    /// The daemon process could not be spawned.
    LaunchFailed,
}

/// Reason a startup attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartError {
    pub kind: StartErrorKind,
    pub message: String,
}

impl StartError {
    pub fn new(kind: StartErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
