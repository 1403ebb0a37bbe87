// ── Daemon response schemas ──
//
// One struct per endpoint payload. Unknown fields are ignored; shape
// mismatches surface as `Error::Deserialization` rather than being
// papered over downstream.

use serde::{Deserialize, Serialize};

// ── /api/daemon/status ──────────────────────────────────────────────

/// Lifecycle state reported by the daemon itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    NotInitialized,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
    /// Any state string this client does not know about.
    #[serde(other)]
    Unknown,
}

impl DaemonState {
    /// States in which the daemon must be told to start before it serves
    /// robot data.
    pub fn needs_start(self) -> bool {
        matches!(
            self,
            Self::NotInitialized | Self::Starting | Self::Stopped | Self::Stopping
        )
    }

    /// States in which the daemon sits idle until a start request arrives.
    pub fn is_idle(self) -> bool {
        matches!(self, Self::NotInitialized | Self::Stopped)
    }
}

/// Body of `GET /api/daemon/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub state: DaemonState,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub backend_status: Option<BackendStatus>,
}

/// Backend sub-status. A populated `error` means the daemon is reachable
/// but its robot backend is unhealthy (e.g. a disconnected sensor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendStatus {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub ready: Option<bool>,
}

impl DaemonStatus {
    /// The embedded backend error, if any.
    pub fn backend_error(&self) -> Option<&str> {
        self.backend_status
            .as_ref()
            .and_then(|b| b.error.as_deref())
            .filter(|e| !e.is_empty())
    }
}

// ── /api/state/full and /api/state/ws/full ──────────────────────────

/// Head pose as sent by the daemon. With `use_pose_matrix=true` the
/// daemon sends `{"m": [16 floats]}`; nested rows and bare flat arrays
/// are accepted too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PosePayload {
    Wrapped { m: Vec<f64> },
    Rows(Vec<Vec<f64>>),
    Flat(Vec<f64>),
}

impl PosePayload {
    /// Normalise to a row-major 4×4 matrix. `None` on wrong dimensions.
    pub fn to_matrix(&self) -> Option<[[f64; 4]; 4]> {
        let flat: Vec<f64> = match self {
            Self::Wrapped { m } | Self::Flat(m) => m.clone(),
            Self::Rows(rows) => {
                if rows.len() != 4 || rows.iter().any(|r| r.len() != 4) {
                    return None;
                }
                rows.iter().flatten().copied().collect()
            }
        };
        if flat.len() != 16 {
            return None;
        }
        let mut matrix = [[0.0; 4]; 4];
        for (i, value) in flat.into_iter().enumerate() {
            matrix[i / 4][i % 4] = value;
        }
        Some(matrix)
    }
}

/// Direction-of-arrival estimate from the microphone array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoaPayload {
    pub angle: f64,
    #[serde(default)]
    pub speech_detected: bool,
}

/// Robot state snapshot, shared by the HTTP snapshot endpoint and the
/// telemetry stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FullState {
    #[serde(default)]
    pub control_mode: Option<String>,
    #[serde(default)]
    pub head_pose: Option<PosePayload>,
    #[serde(default)]
    pub head_joints: Option<Vec<f64>>,
    #[serde(default)]
    pub body_yaw: Option<f64>,
    #[serde(default)]
    pub antennas_position: Option<Vec<f64>>,
    #[serde(default)]
    pub passive_joints: Option<Vec<f64>>,
    #[serde(default)]
    pub doa: Option<DoaPayload>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

// ── /api/move/* ─────────────────────────────────────────────────────

/// Entry of `GET /api/move/running`. Older daemons return bare ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunningMove {
    Object { uuid: String },
    Bare(String),
}

impl RunningMove {
    pub fn id(&self) -> &str {
        match self {
            Self::Object { uuid } | Self::Bare(uuid) => uuid,
        }
    }
}

/// Move lifecycle notification kind on `/api/move/ws/updates`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveUpdateKind {
    MoveStarted,
    MoveCompleted,
    MoveFailed,
    MoveCancelled,
    #[serde(other)]
    Unknown,
}

/// One message of the move-updates stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveUpdate {
    #[serde(rename = "type")]
    pub kind: MoveUpdateKind,
    pub uuid: String,
    #[serde(default)]
    pub details: Option<String>,
}
