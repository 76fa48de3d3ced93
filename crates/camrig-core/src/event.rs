// ── Fleet events ──
//
// Command outcomes, liveness edges and stills flow through one
// broadcast channel of `FleetEvent`s. Video frames get a channel of
// their own so a lagging frame consumer only ever loses frames.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::address_book::CameraId;
use crate::command::{CommandKind, Priority};
use crate::config::TransportMode;

const EVENT_CHANNEL_SIZE: usize = 1024;
const FRAME_CHANNEL_SIZE: usize = 256;

/// One JPEG frame from a camera's video stream.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub camera: CameraId,
    pub data: Bytes,
    pub received_at: Instant,
}

/// A completed still capture, with the DNG when the camera sent one.
#[derive(Debug, Clone)]
pub struct StillCapture {
    pub camera: CameraId,
    pub jpeg: Bytes,
    pub dng: Option<Bytes>,
    /// Taken when the last byte was read, not when the peer connected.
    pub completed_at: DateTime<Utc>,
}

impl StillCapture {
    pub fn is_raw(&self) -> bool {
        self.dng.is_some()
    }

    pub fn total_bytes(&self) -> usize {
        self.jpeg.len() + self.dng.as_ref().map_or(0, Bytes::len)
    }

    /// File name without extension, e.g. `rep3_20250114_093012`.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.camera, self.completed_at.format("%Y%m%d_%H%M%S"))
    }
}

#[derive(Debug, Clone)]
pub enum FleetEvent {
    CommandQueued {
        camera: CameraId,
        kind: CommandKind,
        priority: Priority,
        description: String,
        position: usize,
    },
    CommandSent {
        camera: CameraId,
        kind: CommandKind,
        description: String,
        bytes: usize,
        attempts: u32,
        mode: TransportMode,
    },
    /// Emitted once per command, after its retry budget is exhausted.
    CommandFailed {
        camera: CameraId,
        kind: CommandKind,
        description: String,
        error: String,
        attempts: u32,
    },
    QueueCleared {
        count: usize,
    },
    CameraOnline {
        camera: CameraId,
    },
    CameraOffline {
        camera: CameraId,
    },
    Still(Arc<StillCapture>),
    ModeChanged {
        mode: TransportMode,
    },
}

impl FleetEvent {
    /// The camera this event concerns, if any.
    pub fn camera(&self) -> Option<CameraId> {
        match self {
            Self::CommandQueued { camera, .. }
            | Self::CommandSent { camera, .. }
            | Self::CommandFailed { camera, .. }
            | Self::CameraOnline { camera }
            | Self::CameraOffline { camera } => Some(*camera),
            Self::Still(capture) => Some(capture.camera),
            Self::QueueCleared { .. } | Self::ModeChanged { .. } => None,
        }
    }
}

/// Cloneable sending half shared by every component.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<FleetEvent>,
    frames: broadcast::Sender<Arc<VideoFrame>>,
}

impl EventSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (frames, _) = broadcast::channel(FRAME_CHANNEL_SIZE);
        Self { tx, frames }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: FleetEvent) {
        let _ = self.tx.send(event);
    }

    pub fn emit_frame(&self, frame: VideoFrame) {
        let _ = self.frames.send(Arc::new(frame));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.tx.subscribe()
    }

    pub fn subscribe_frames(&self) -> broadcast::Receiver<Arc<VideoFrame>> {
        self.frames.subscribe()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}
