// reachylink-api: Async Rust client for the Reachy Mini daemon (HTTP + WebSocket)

pub mod client;
pub mod error;
pub mod models;
pub mod transport;
pub mod websocket;

pub use client::DaemonClient;
pub use error::Error;
pub use models::{
    BackendStatus, DaemonState, DaemonStatus, DoaPayload, FullState, MoveUpdate, MoveUpdateKind,
    PosePayload, RunningMove,
};
pub use transport::TransportConfig;
pub use websocket::{CloseInfo, StreamEvent};
pub use reqwest::Method;
