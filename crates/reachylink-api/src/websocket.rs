//! WebSocket connector for the daemon's streaming endpoints.
//!
//! [`open`] performs the upgrade handshake and yields a stream of
//! [`StreamEvent`]s. The stream always ends with exactly one terminal
//! event ([`StreamEvent::Closed`] or [`StreamEvent::Failed`]) so the
//! caller can decide whether the close was normal or worth a reconnect.
//! Reconnection policy lives with the caller.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures_util::StreamExt;
//! use reachylink_api::websocket::{self, StreamEvent};
//!
//! let url = url::Url::parse("ws://127.0.0.1:8000/api/move/ws/updates")?;
//! let mut events = websocket::open(&url).await?;
//! while let Some(event) = events.next().await {
//!     if let StreamEvent::Text(text) = event {
//!         println!("{text}");
//!     }
//! }
//! ```

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use url::Url;

use crate::error::Error;

/// RFC 6455 normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// RFC 6455 "abnormal closure": the connection dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close frame details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

/// One item read from a daemon stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A text frame.
    Text(String),
    /// The peer closed the connection. `None` means the socket ended
    /// without a close frame.
    Closed(Option<CloseInfo>),
    /// A protocol or I/O error terminated the connection.
    Failed(String),
}

impl StreamEvent {
    /// Whether this terminal event is a deliberate, normal closure.
    pub fn is_normal_closure(&self) -> bool {
        matches!(self, Self::Closed(Some(CloseInfo { code, .. })) if *code == NORMAL_CLOSURE)
    }

    /// Close code for terminal events, synthesising 1006 when missing.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Text(_) => None,
            Self::Closed(Some(info)) => Some(info.code),
            Self::Closed(None) | Self::Failed(_) => Some(ABNORMAL_CLOSURE),
        }
    }
}

/// Boxed event stream returned by [`open`].
pub type EventStream = BoxStream<'static, StreamEvent>;

/// Establish a single WebSocket connection.
///
/// Resolves once the handshake completes; read errors after that point
/// are reported in-band as [`StreamEvent::Failed`].
pub async fn open(url: &Url) -> Result<EventStream, Error> {
    tracing::debug!(url = %url, "Connecting to WebSocket");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let (mut ws_stream, _response) = tokio_tungstenite::connect_async(ClientRequestBuilder::new(uri))
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::debug!(url = %url, "WebSocket connected");

    Ok(Box::pin(async_stream::stream! {
        while let Some(frame) = ws_stream.next().await {
            match frame {
                Ok(tungstenite::Message::Text(text)) => {
                    yield StreamEvent::Text(text.to_string());
                }
                Ok(tungstenite::Message::Close(frame)) => {
                    let info = frame.map(|cf| CloseInfo {
                        code: u16::from(cf.code),
                        reason: cf.reason.to_string(),
                    });
                    yield StreamEvent::Closed(info);
                    return;
                }
                Ok(tungstenite::Message::Ping(_)) => {
                    // tungstenite handles pong replies automatically
                    tracing::trace!("WebSocket ping");
                }
                Ok(_) => {
                    // Binary, Pong, Frame -- ignore
                }
                Err(e) => {
                    yield StreamEvent::Failed(e.to_string());
                    return;
                }
            }
        }
        // Stream ended without a close frame
        yield StreamEvent::Closed(None);
    }))
}

// ── Tests ────────────────────────────────────────────────────────────

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_closure_detected() {
        let event = StreamEvent::Closed(Some(CloseInfo {
            code: NORMAL_CLOSURE,
            reason: "bye".into(),
        }));
        assert!(event.is_normal_closure());
        assert_eq!(event.close_code(), Some(1000));
    }

    #[test]
    fn missing_close_frame_is_abnormal() {
        let event = StreamEvent::Closed(None);
        assert!(!event.is_normal_closure());
        assert_eq!(event.close_code(), Some(ABNORMAL_CLOSURE));
    }

    #[test]
    fn going_away_is_not_normal() {
        let event = StreamEvent::Closed(Some(CloseInfo {
            code: 1001,
            reason: String::new(),
        }));
        assert!(!event.is_normal_closure());
    }

    #[test]
    fn failures_and_text_frames() {
        assert_eq!(StreamEvent::Failed("reset".into()).close_code(), Some(1006));
        assert_eq!(StreamEvent::Text("{}".into()).close_code(), None);
    }

    #[tokio::test]
    async fn open_rejects_unreachable_host() {
        let url = Url::parse("ws://127.0.0.1:1/api/move/ws/updates").unwrap();
        let result = open(&url).await;
        assert!(matches!(result, Err(Error::WebSocketConnect(_))));
    }
}
