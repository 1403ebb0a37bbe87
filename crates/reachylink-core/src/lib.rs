// reachylink-core: Connection, health and telemetry layer between reachylink-api and consumers (CLI/UI).

pub mod backend;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod executor;
pub mod health;
pub mod lifecycle;
pub mod machine;
pub mod model;
pub mod telemetry;

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use backend::{
    ApiFactory, DaemonApi, FetchRequest, HttpApiFactory, LaunchSpec, ProcessLauncher,
    ProcessSignal, StreamConnector, WebSocketConnector,
};
pub use config::{ConnectionConfig, LaunchConfig};
pub use connection::{Backends, ConnectOptions, Connection};
pub use error::{CoreError, LifecycleFault};
pub use event::{ConnectionEvent, EventBus, HealthFailureKind, MoveOutcome, OutputStream};
pub use executor::{Outcome, RequestPolicy, TimedExecutor};
pub use health::{HealthGate, HealthMonitor, SkipReason, TickOutcome};
pub use lifecycle::usb::detect_robot_port;
pub use lifecycle::{CommandLauncher, DaemonLog};
pub use machine::StateMachine;
pub use telemetry::{ActiveMoves, FrameStream, StreamEnd, TelemetryStore};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    // Connection state
    BusyReason, ConnectionMode, ConnectionState, CrashReason, RobotStatus,
    // Faults
    HardwareFault, HardwareFaultKind, StartError, StartErrorKind,
    // Telemetry
    ActiveMoveRecord, DirectionOfArrival, TelemetryFrame,
};
