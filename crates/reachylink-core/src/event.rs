// ── Event bus ──
//
// Closed set of connection events over a `broadcast` channel. Producers
// never block: a subscriber that falls behind loses the oldest events
// and sees `RecvError::Lagged`.

use std::sync::Arc;

use serde::Serialize;
use strum::Display;
use tokio::sync::broadcast;

use crate::model::{
    ConnectionState, CrashReason, HardwareFault, RobotStatus, StartError, TelemetryFrame,
};

/// Classified cause of a failed health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HealthFailureKind {
    /// HTTP 200 with an embedded backend error.
    BackendError,
    /// Non-success HTTP status.
    HttpError,
    /// Timeout or transport failure.
    Network,
    /// Anything else, e.g. an unparseable body.
    Error,
}

/// Which daemon pipe produced an output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Terminal outcome of a robot move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MoveOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// Everything observable about a connection, in order of occurrence.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A state machine change was applied.
    StateChanged {
        previous: RobotStatus,
        current: ConnectionState,
    },
    HealthSuccess,
    HealthFailure {
        kind: HealthFailureKind,
        consecutive: u32,
    },
    /// A start request was sent to the daemon.
    StartRequested { wake_up: bool },
    StartSuccess,
    StartError(StartError),
    Crash {
        previous: RobotStatus,
        reason: CrashReason,
    },
    HardwareError(HardwareFault),
    DaemonOutput { stream: OutputStream, line: String },
    /// Process activity pushed the startup deadline back.
    StartupDeadlineRearmed,
    StateUpdated(Arc<TelemetryFrame>),
    MoveStarted { id: String },
    MoveEnded { id: String, outcome: MoveOutcome },
    /// `reset_all` completed; the connection is back to `Disconnected`.
    Reset,
}

/// Cheaply cloneable publisher handle.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConnectionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: ConnectionEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(ConnectionEvent::HealthSuccess);
        bus.publish(ConnectionEvent::StartSuccess);

        assert!(matches!(rx.recv().await, Ok(ConnectionEvent::HealthSuccess)));
        assert!(matches!(rx.recv().await, Ok(ConnectionEvent::StartSuccess)));
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.publish(ConnectionEvent::Reset);
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for _ in 0..5 {
            bus.publish(ConnectionEvent::HealthSuccess);
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
    }

    #[test]
    fn failure_kind_labels() {
        assert_eq!(HealthFailureKind::BackendError.to_string(), "backend_error");
        assert_eq!(HealthFailureKind::Network.to_string(), "network");
    }
}
