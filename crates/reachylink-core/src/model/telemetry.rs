// ── Telemetry frames ──

use serde::{Deserialize, Serialize};

pub const HEAD_JOINT_COUNT: usize = 7;
pub const PASSIVE_JOINT_COUNT: usize = 21;
pub const ANTENNA_COUNT: usize = 2;

/// Direction-of-arrival estimate from the microphone array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionOfArrival {
    /// Radians.
    pub angle: f64,
    pub speech_detected: bool,
}

/// One telemetry sample, as published to consumers.
///
/// Frames are immutable and replaced wholesale; `version` increases by
/// one for every frame received on the current stream connection and
/// restarts when the stream reconnects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub version: u64,
    /// Row-major 4×4 homogeneous transform.
    pub head_pose: Option<[[f64; 4]; 4]>,
    pub head_joints: Option<[f64; HEAD_JOINT_COUNT]>,
    pub body_yaw: Option<f64>,
    /// Computed client-side; never taken from the daemon feed.
    pub passive_joints: Option<[f64; PASSIVE_JOINT_COUNT]>,
    pub antennas: Option<[f64; ANTENNA_COUNT]>,
    pub direction_of_arrival: Option<DirectionOfArrival>,
    pub control_mode: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

/// A move currently running on the robot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActiveMoveRecord {
    pub id: String,
}
