// ── Telemetry ──
//
// Latest robot state, the move set, and the two daemon streams that feed
// them. Frames are swapped whole through a `watch` channel; consumers
// never see a half-updated frame.

mod moves;
mod stream;

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures_core::Stream;
use futures_util::future::BoxFuture;
use reachylink_api::FullState;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use crate::error::CoreError;
use crate::event::{ConnectionEvent, EventBus};
use crate::model::{
    ANTENNA_COUNT, DirectionOfArrival, HEAD_JOINT_COUNT, PASSIVE_JOINT_COUNT, TelemetryFrame,
};

pub use moves::ActiveMoves;
pub(crate) use moves::MovesSink;
pub use stream::StreamEnd;
pub(crate) use stream::{StreamSink, StreamSpec, run_stream};

// ── Store ────────────────────────────────────────────────────────────

/// Latest telemetry frame plus the client-computed passive joints.
#[derive(Clone)]
pub struct TelemetryStore {
    frame: Arc<watch::Sender<Option<Arc<TelemetryFrame>>>>,
    passive_joints: Arc<ArcSwapOption<[f64; PASSIVE_JOINT_COUNT]>>,
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryStore {
    pub fn new() -> Self {
        let (frame, _) = watch::channel(None);
        Self {
            frame: Arc::new(frame),
            passive_joints: Arc::new(ArcSwapOption::empty()),
        }
    }

    pub fn latest(&self) -> Option<Arc<TelemetryFrame>> {
        self.frame.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<TelemetryFrame>>> {
        self.frame.subscribe()
    }

    /// Frames as a `Stream`, starting with the current value.
    pub fn frames(&self) -> FrameStream {
        FrameStream {
            inner: WatchStream::new(self.frame.subscribe()),
        }
    }

    /// Store externally computed passive joints. They are merged into
    /// every subsequent frame; the daemon feed never overrides them.
    pub fn set_passive_joints(&self, joints: Option<[f64; PASSIVE_JOINT_COUNT]>) {
        self.passive_joints.store(joints.map(Arc::new));
    }

    pub fn passive_joints(&self) -> Option<[f64; PASSIVE_JOINT_COUNT]> {
        self.passive_joints.load_full().map(|j| *j)
    }

    /// Convert a daemon snapshot into a frame and publish it.
    pub fn ingest(&self, version: u64, state: FullState) -> Result<Arc<TelemetryFrame>, CoreError> {
        let frame = Arc::new(frame_from_state(version, state, self.passive_joints())?);
        self.frame.send_replace(Some(frame.clone()));
        Ok(frame)
    }

    pub(crate) fn clear(&self) {
        self.frame.send_replace(None);
        self.passive_joints.store(None);
    }
}

/// `Stream` of telemetry frames backed by the store's `watch` channel.
pub struct FrameStream {
    inner: WatchStream<Option<Arc<TelemetryFrame>>>,
}

impl Stream for FrameStream {
    type Item = Option<Arc<TelemetryFrame>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

// ── Conversion ───────────────────────────────────────────────────────

fn frame_from_state(
    version: u64,
    state: FullState,
    passive_joints: Option<[f64; PASSIVE_JOINT_COUNT]>,
) -> Result<TelemetryFrame, CoreError> {
    let head_pose = match state.head_pose {
        None => None,
        Some(pose) => Some(pose.to_matrix().ok_or_else(|| CoreError::Protocol {
            message: "head_pose is not a 4x4 matrix".into(),
        })?),
    };

    Ok(TelemetryFrame {
        version,
        head_pose,
        head_joints: fixed::<HEAD_JOINT_COUNT>("head_joints", state.head_joints)?,
        body_yaw: state.body_yaw,
        passive_joints,
        antennas: fixed::<ANTENNA_COUNT>("antennas_position", state.antennas_position)?,
        direction_of_arrival: state.doa.map(|doa| DirectionOfArrival {
            angle: doa.angle,
            speech_detected: doa.speech_detected,
        }),
        control_mode: state.control_mode,
        timestamp_ms: timestamp_ms(state.timestamp.as_deref()),
    })
}

fn fixed<const N: usize>(field: &str, values: Option<Vec<f64>>) -> Result<Option<[f64; N]>, CoreError> {
    values
        .map(|v| {
            let len = v.len();
            <[f64; N]>::try_from(v).map_err(|_| CoreError::Protocol {
                message: format!("{field}: expected {N} values, got {len}"),
            })
        })
        .transpose()
}

/// Daemon timestamps are ISO-8601, with or without an offset. Missing or
/// unparseable values fall back to the receive time.
fn timestamp_ms(raw: Option<&str>) -> u64 {
    let parsed = raw.and_then(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    });
    let dt = parsed.unwrap_or_else(Utc::now);
    u64::try_from(dt.timestamp_millis()).unwrap_or(0)
}

// ── Telemetry sink ───────────────────────────────────────────────────

/// Turns state-stream messages into versioned frames.
pub(crate) struct TelemetrySink {
    store: TelemetryStore,
    bus: EventBus,
    version: AtomicU64,
}

impl TelemetrySink {
    pub(crate) fn new(store: TelemetryStore, bus: EventBus) -> Self {
        Self {
            store,
            bus,
            version: AtomicU64::new(0),
        }
    }
}

impl StreamSink for TelemetrySink {
    fn opened(&self) -> BoxFuture<'_, ()> {
        self.version.store(0, Ordering::SeqCst);
        Box::pin(async {})
    }

    fn message(&self, text: &str) {
        let state: FullState = match serde_json::from_str(text) {
            Ok(state) => state,
            Err(e) => {
                debug!(error = %e, "unparseable telemetry message");
                return;
            }
        };
        let version = self.version.load(Ordering::SeqCst) + 1;
        match self.store.ingest(version, state) {
            Ok(frame) => {
                self.version.store(version, Ordering::SeqCst);
                self.bus.publish(ConnectionEvent::StateUpdated(frame));
            }
            Err(e) => debug!(error = %e, "telemetry frame rejected"),
        }
    }
}
