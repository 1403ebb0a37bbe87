// ── Stream reconnection loop ──
//
// One connection at a time per stream. `attempts` counts consecutive
// connections that ended abnormally without delivering a message; a
// normal closure (1000) ends the loop for good.

use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use reachylink_api::StreamEvent;
use reachylink_api::websocket::ABNORMAL_CLOSURE;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::backend::StreamConnector;
use crate::machine::StateMachine;
use crate::model::ConnectionState;

/// Consumer of one stream's text messages.
pub(crate) trait StreamSink: Send + Sync {
    /// A connection was established. Runs before the first message.
    fn opened(&self) -> BoxFuture<'_, ()>;

    fn message(&self, text: &str);
}

/// Where to connect and how hard to retry.
#[derive(Debug, Clone)]
pub(crate) struct StreamSpec {
    pub name: &'static str,
    pub url: Url,
    pub max_attempts: u32,
    pub delay: Duration,
}

/// Why a stream loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Cancelled,
    /// The connection left the active states.
    Inactive,
    /// The daemon closed the stream normally.
    Closed,
    /// Reconnect attempts exhausted.
    GaveUp,
}

enum ConnectionEnd {
    Normal,
    Abnormal { delivered: bool, reason: String },
}

/// Drive `spec` until cancelled, inactive, closed, or out of attempts.
pub(crate) async fn run_stream(
    spec: &StreamSpec,
    connector: &dyn StreamConnector,
    machine: &StateMachine,
    cancel: &CancellationToken,
    sink: &dyn StreamSink,
) -> StreamEnd {
    let mut state = machine.subscribe();
    let mut attempts: u32 = 0;

    loop {
        if !state.borrow().is_active() {
            return StreamEnd::Inactive;
        }

        let end = tokio::select! {
            biased;
            () = cancel.cancelled() => return StreamEnd::Cancelled,
            () = left_active(&mut state) => return StreamEnd::Inactive,
            end = connect_and_read(spec, connector, sink) => end,
        };

        match end {
            ConnectionEnd::Normal => {
                info!(stream = spec.name, "stream closed normally");
                return StreamEnd::Closed;
            }
            ConnectionEnd::Abnormal { delivered, reason } => {
                if delivered {
                    attempts = 0;
                }
                if attempts >= spec.max_attempts {
                    warn!(
                        stream = spec.name,
                        max_attempts = spec.max_attempts,
                        %reason,
                        "stream reconnect limit reached, giving up"
                    );
                    return StreamEnd::GaveUp;
                }
                attempts += 1;
                debug!(
                    stream = spec.name,
                    attempt = attempts,
                    delay_ms = u64::try_from(spec.delay.as_millis()).unwrap_or(u64::MAX),
                    %reason,
                    "stream dropped, reconnecting"
                );

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return StreamEnd::Cancelled,
                    () = tokio::time::sleep(spec.delay) => {}
                }
            }
        }
    }
}

/// Resolves once the state is no longer active.
async fn left_active(state: &mut watch::Receiver<ConnectionState>) {
    if state.wait_for(|s| !s.is_active()).await.is_err() {
        // Machine dropped; nothing left to stream for.
        std::future::pending::<()>().await;
    }
}

/// Open one connection and read it to its terminal event.
async fn connect_and_read(
    spec: &StreamSpec,
    connector: &dyn StreamConnector,
    sink: &dyn StreamSink,
) -> ConnectionEnd {
    let mut events = match connector.open(spec.url.clone()).await {
        Ok(events) => events,
        Err(e) => {
            return ConnectionEnd::Abnormal {
                delivered: false,
                reason: e.to_string(),
            };
        }
    };
    debug!(stream = spec.name, url = %spec.url, "stream connected");
    sink.opened().await;

    let mut delivered = false;
    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Text(text) => {
                delivered = true;
                sink.message(&text);
            }
            terminal if terminal.is_normal_closure() => return ConnectionEnd::Normal,
            terminal => {
                return ConnectionEnd::Abnormal {
                    delivered,
                    reason: abnormal_reason(&terminal),
                };
            }
        }
    }
    ConnectionEnd::Abnormal {
        delivered,
        reason: "stream ended without a close frame".into(),
    }
}

fn abnormal_reason(event: &StreamEvent) -> String {
    let code = event.close_code().unwrap_or(ABNORMAL_CLOSURE);
    match event {
        StreamEvent::Failed(error) => format!("{error} (close code {code})"),
        StreamEvent::Closed(Some(info)) if !info.reason.is_empty() => {
            format!("{} (close code {code})", info.reason)
        }
        _ => format!("closed with code {code}"),
    }
}
