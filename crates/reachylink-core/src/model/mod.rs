// ── Connection domain model ──
//
// Every type a consumer (CLI, UI) observes: the connection snapshot,
// its status enums, fault records, and telemetry frames. Wire payloads
// live in `reachylink_api::models`; these are the normalised forms.

pub mod fault;
pub mod state;
pub mod telemetry;

// ── Re-exports ──────────────────────────────────────────────────────

pub use fault::{HardwareFault, HardwareFaultKind, StartError, StartErrorKind};
pub use state::{BusyReason, ConnectionMode, ConnectionState, CrashReason, RobotStatus};
pub use telemetry::{
    ANTENNA_COUNT, ActiveMoveRecord, DirectionOfArrival, HEAD_JOINT_COUNT, PASSIVE_JOINT_COUNT, TelemetryFrame,
};
