//! Network command-and-media core for a fleet of up to eight cameras.
//!
//! - **[`FleetController`]**: the facade. Owns the [`AddressBook`], the
//!   [`TransportMode`] and the event sink, and runs four loops for its
//!   lifetime: command dispatch, heartbeat, video and still receive.
//!   Every outbound call is a non-blocking enqueue.
//!
//! - **[`CommandDispatcher`]**: priority queue (FIFO within a priority)
//!   drained by one loop, with bounded retry by re-enqueue.
//!
//! - **[`HeartbeatMonitor`]**: per-camera liveness from `HEARTBEAT`
//!   beacons, published as edge events and a watch-backed
//!   [`StatusStream`].
//!
//! - **[`VideoFrameReceiver`]** / **[`StillImageReceiver`]**: inbound
//!   JPEG frames over UDP and still captures (optionally with DNG) over
//!   TCP, attributed to cameras by sender address.
//!
//! Everything inbound and every command outcome is reported as a
//! [`FleetEvent`] on one broadcast channel.

pub mod address_book;
pub mod command;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod heartbeat;
mod net;
pub mod still;
pub mod stream;
pub mod transport;
pub mod video;

// ── Primary re-exports ──────────────────────────────────────────────
pub use address_book::{AddressBook, CameraEntry, CameraId, PortKind, PortSet};
pub use command::{
    CameraSettings, Command, CommandKind, CropRegion, FieldSetting, Instruction, Priority,
    SettingField, SettingValue, SettingsMap,
};
pub use config::{FleetConfig, FleetTiming, TransportMode};
pub use controller::FleetController;
pub use dispatcher::{CommandDispatcher, DispatchStats};
pub use error::{CoreError, StillError, TransportError};
pub use event::{EventSink, FleetEvent, StillCapture, VideoFrame};
pub use heartbeat::HeartbeatMonitor;
pub use still::{StillImageReceiver, StillStats};
pub use stream::{LivenessMap, StatusStream};
pub use transport::{CommandTransport, MockTransport, UdpTransport};
pub use video::{VideoFrameReceiver, VideoStats};
