// ── Connection state snapshot ──

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::fault::{HardwareFault, StartError};

/// How the robot is reached.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionMode {
    /// USB serial link; the daemon runs as a local child process.
    Direct,
    /// The daemon runs on the robot and is reached over the network.
    Remote,
    /// Local daemon driving a simulated robot.
    Simulated,
}

impl ConnectionMode {
    /// Whether this mode owns a locally spawned daemon process.
    pub fn is_local(self) -> bool {
        !matches!(self, Self::Remote)
    }
}

/// Lifecycle status of the robot connection.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RobotStatus {
    #[default]
    Disconnected,
    ReadyToStart,
    Starting,
    Sleeping,
    Ready,
    Busy,
    Stopping,
    Crashed,
}

impl RobotStatus {
    /// Statuses in which the daemon is up and serving robot data.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Ready | Self::Busy | Self::Sleeping)
    }
}

/// Why the robot is busy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BusyReason {
    Moving,
    Command,
    AppRunning,
    Installing,
}

/// What drove the state machine into `Crashed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CrashReason {
    /// Consecutive health-check failures reached the threshold.
    HealthThreshold,
    /// The daemon process exited.
    ProcessExited,
    /// The daemon never reported ready before the startup deadline.
    StartupTimeout,
    /// The daemon could not be launched at all.
    LaunchFailed,
    /// An active status without a connection mode.
    InvalidState,
}

/// Single source of truth for the connection.
///
/// Consumers observe snapshots through a `watch` channel; every
/// mutation goes through `StateMachine`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub mode: Option<ConnectionMode>,
    pub status: RobotStatus,
    pub busy_reason: Option<BusyReason>,
    pub consecutive_health_failures: u32,
    pub is_daemon_crashed: bool,
    pub remote_host: Option<String>,
    pub hardware_error: Option<HardwareFault>,
    pub start_error: Option<StartError>,
}

impl ConnectionState {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// A session exists (anything but `Disconnected`).
    pub fn in_session(&self) -> bool {
        self.status != RobotStatus::Disconnected
    }
}
