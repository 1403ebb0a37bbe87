// ── Active moves ──

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use futures_util::future::BoxFuture;
use reachylink_api::{MoveUpdate, MoveUpdateKind};
use tracing::{debug, trace};

use crate::backend::DaemonApi;
use crate::event::{ConnectionEvent, EventBus, MoveOutcome};
use crate::executor::{Outcome, RequestPolicy, TimedExecutor};
use crate::model::ActiveMoveRecord;

use super::StreamSink;

/// Ids of moves currently running on the robot.
#[derive(Debug, Clone, Default)]
pub struct ActiveMoves {
    ids: Arc<DashSet<String>>,
}

impl ActiveMoves {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorted snapshot.
    pub fn snapshot(&self) -> Vec<ActiveMoveRecord> {
        let mut records: Vec<ActiveMoveRecord> = self
            .ids
            .iter()
            .map(|id| ActiveMoveRecord { id: id.key().clone() })
            .collect();
        records.sort();
        records
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub(crate) fn insert(&self, id: String) -> bool {
        self.ids.insert(id)
    }

    pub(crate) fn remove(&self, id: &str) -> bool {
        self.ids.remove(id).is_some()
    }

    pub(crate) fn replace(&self, ids: impl IntoIterator<Item = String>) {
        self.ids.clear();
        for id in ids {
            self.ids.insert(id);
        }
    }

    pub(crate) fn clear(&self) {
        self.ids.clear();
    }
}

/// Move-updates stream consumer. The stream only carries deltas, so each
/// new connection is seeded from `GET /api/move/running`.
pub(crate) struct MovesSink {
    api: Arc<dyn DaemonApi>,
    executor: TimedExecutor,
    moves: ActiveMoves,
    bus: EventBus,
    seed_timeout: Duration,
}

impl MovesSink {
    pub(crate) fn new(
        api: Arc<dyn DaemonApi>,
        executor: TimedExecutor,
        moves: ActiveMoves,
        bus: EventBus,
        seed_timeout: Duration,
    ) -> Self {
        Self {
            api,
            executor,
            moves,
            bus,
            seed_timeout,
        }
    }
}

impl StreamSink for MovesSink {
    fn opened(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let result = self
                .executor
                .run(
                    "running moves",
                    RequestPolicy::new(self.seed_timeout),
                    self.api.running_moves(self.seed_timeout),
                )
                .await;
            match result {
                Ok(Outcome::Done(running)) => {
                    debug!(count = running.len(), "active moves seeded");
                    self.moves
                        .replace(running.iter().map(|m| m.id().to_owned()));
                }
                Ok(Outcome::Skipped) => {}
                Err(e) => debug!(error = %e, "could not seed active moves"),
            }
        })
    }

    fn message(&self, text: &str) {
        let update: MoveUpdate = match serde_json::from_str(text) {
            Ok(update) => update,
            Err(e) => {
                debug!(error = %e, "unparseable move update");
                return;
            }
        };
        let outcome = match update.kind {
            MoveUpdateKind::MoveStarted => {
                self.moves.insert(update.uuid.clone());
                self.bus
                    .publish(ConnectionEvent::MoveStarted { id: update.uuid });
                return;
            }
            MoveUpdateKind::MoveCompleted => MoveOutcome::Completed,
            MoveUpdateKind::MoveFailed => MoveOutcome::Failed,
            MoveUpdateKind::MoveCancelled => MoveOutcome::Cancelled,
            MoveUpdateKind::Unknown => {
                trace!(uuid = %update.uuid, "ignoring unknown move update");
                return;
            }
        };
        self.moves.remove(&update.uuid);
        self.bus.publish(ConnectionEvent::MoveEnded {
            id: update.uuid,
            outcome,
        });
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::machine::StateMachine;
    use crate::testing::{FakeApi, drain};

    fn sink(api: Arc<FakeApi>) -> (MovesSink, ActiveMoves, EventBus) {
        let bus = EventBus::new(32);
        let moves = ActiveMoves::new();
        let sink = MovesSink::new(
            api,
            TimedExecutor::new(StateMachine::new(bus.clone())),
            moves.clone(),
            bus.clone(),
            Duration::from_secs(3),
        );
        (sink, moves, bus)
    }

    fn ids(moves: &ActiveMoves) -> Vec<String> {
        moves.snapshot().into_iter().map(|r| r.id).collect()
    }

    #[tokio::test]
    async fn opening_seeds_from_running_moves() {
        let api = FakeApi::new();
        api.set_running_moves(&["b", "a"]);
        let (sink, moves, _bus) = sink(api.clone());
        moves.insert("stale".into());

        sink.opened().await;

        assert_eq!(ids(&moves), vec!["a", "b"]);
        assert_eq!(api.count("running_moves"), 1);
    }

    #[tokio::test]
    async fn updates_track_the_running_set() {
        let (sink, moves, bus) = sink(FakeApi::new());
        let mut rx = bus.subscribe();

        sink.message(&json!({ "type": "move_started", "uuid": "m1" }).to_string());
        sink.message(&json!({ "type": "move_started", "uuid": "m2" }).to_string());
        assert_eq!(moves.len(), 2);

        sink.message(&json!({ "type": "move_completed", "uuid": "m1" }).to_string());
        sink.message(&json!({ "type": "move_cancelled", "uuid": "m2" }).to_string());
        sink.message(&json!({ "type": "move_teleported", "uuid": "m3" }).to_string());
        sink.message("garbage");
        assert!(moves.is_empty());

        let ended: Vec<(String, MoveOutcome)> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ConnectionEvent::MoveEnded { id, outcome } => Some((id, outcome)),
                _ => None,
            })
            .collect();
        assert_eq!(
            ended,
            vec![
                ("m1".to_owned(), MoveOutcome::Completed),
                ("m2".to_owned(), MoveOutcome::Cancelled),
            ]
        );
    }
}
