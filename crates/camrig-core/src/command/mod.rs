// ── Command model ──
//
// Outbound instructions, their wire encoding and routing, and the
// queued `Command` that carries one instruction to one camera.

pub mod settings;

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use strum::Display;

use crate::address_book::{AddressBook, CameraId, PortKind};

pub use settings::{
    CameraSettings, CropRegion, FieldSetting, SettingField, SettingValue, SettingsMap,
};

const DESCRIPTION_LIMIT: usize = 50;

/// Retry bound for ordinary commands.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Retry bound for irreversible commands.
pub const CRITICAL_MAX_RETRIES: u32 = 1;

// ── Priority ─────────────────────────────────────────────────────

/// Dispatch urgency. Higher variants are sent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

/// Broad category of an instruction, carried on events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Capture,
    Stream,
    Settings,
    Transform,
    System,
}

// ── Instruction ──────────────────────────────────────────────────

/// Everything a camera can be told to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    CaptureStill,
    StartStream,
    StopStream,
    RestartStreamWithSettings,
    /// Bulk settings, applied by the camera as a unit.
    ApplySettings(SettingsMap),
    SetField(FieldSetting),
    Shutdown,
    Reboot,
    FactoryReset,
}

impl Instruction {
    /// Text datagram sent to the camera.
    pub fn encode(&self) -> String {
        match self {
            Self::CaptureStill => "CAPTURE_STILL".into(),
            Self::StartStream => "START_STREAM".into(),
            Self::StopStream => "STOP_STREAM".into(),
            Self::RestartStreamWithSettings => "RESTART_STREAM_WITH_SETTINGS".into(),
            Self::ApplySettings(map) => {
                format!("SET_ALL_SETTINGS_{}", serde_json::Value::Object(map.clone()))
            }
            Self::SetField(setting) => setting.encode(),
            Self::Shutdown => "SHUTDOWN".into(),
            Self::Reboot => "REBOOT".into(),
            Self::FactoryReset => "RESET_TO_FACTORY_DEFAULTS".into(),
        }
    }

    /// Channel the instruction is delivered on.
    pub fn port(&self) -> PortKind {
        match self {
            Self::CaptureStill => PortKind::Still,
            Self::StartStream | Self::StopStream | Self::RestartStreamWithSettings => {
                PortKind::VideoControl
            }
            Self::ApplySettings(_)
            | Self::SetField(_)
            | Self::Shutdown
            | Self::Reboot
            | Self::FactoryReset => PortKind::Control,
        }
    }

    pub fn default_priority(&self) -> Priority {
        match self {
            Self::CaptureStill | Self::StopStream => Priority::High,
            Self::StartStream
            | Self::RestartStreamWithSettings
            | Self::ApplySettings(_)
            | Self::SetField(_) => Priority::Normal,
            Self::Shutdown | Self::Reboot | Self::FactoryReset => Priority::Critical,
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Self::CaptureStill => CommandKind::Capture,
            Self::StartStream | Self::StopStream | Self::RestartStreamWithSettings => {
                CommandKind::Stream
            }
            Self::ApplySettings(_) => CommandKind::Settings,
            Self::SetField(setting) => match setting.field() {
                SettingField::FlipHorizontal
                | SettingField::FlipVertical
                | SettingField::Rotation
                | SettingField::Grayscale => CommandKind::Transform,
                _ => CommandKind::Settings,
            },
            Self::Shutdown | Self::Reboot | Self::FactoryReset => CommandKind::System,
        }
    }

    /// Irreversible actions that get the reduced retry bound.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::Shutdown | Self::Reboot | Self::FactoryReset)
    }

    pub fn default_max_retries(&self) -> u32 {
        if self.is_destructive() {
            CRITICAL_MAX_RETRIES
        } else {
            DEFAULT_MAX_RETRIES
        }
    }
}

// ── Command ──────────────────────────────────────────────────────

/// One instruction addressed to one camera, as held in the queue.
#[derive(Debug, Clone)]
pub struct Command {
    pub camera: CameraId,
    pub target: SocketAddr,
    pub instruction: Instruction,
    pub priority: Priority,
    pub created_at: Instant,
    pub retries: u32,
    pub max_retries: u32,
    payload: Bytes,
}

impl Command {
    /// Address `instruction` to `camera` using the book's routing and
    /// the instruction's default priority and retry bound.
    pub fn new(book: &AddressBook, camera: CameraId, instruction: Instruction) -> Self {
        let target = book.socket_addr(camera, instruction.port());
        let payload = Bytes::from(instruction.encode());
        Self {
            camera,
            target,
            priority: instruction.default_priority(),
            max_retries: instruction.default_max_retries(),
            instruction,
            created_at: Instant::now(),
            retries: 0,
            payload,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn kind(&self) -> CommandKind {
        self.instruction.kind()
    }

    /// Attempts made so far, counting the one in flight.
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Short human-readable form of the payload.
    pub fn description(&self) -> String {
        let text = String::from_utf8_lossy(&self.payload);
        if text.chars().count() > DESCRIPTION_LIMIT {
            let head: String = text.chars().take(DESCRIPTION_LIMIT).collect();
            format!("{head}...")
        } else {
            text.into_owned()
        }
    }

    /// Transition out of a failed send: `Ok` carries the command back to
    /// the queue with one more retry counted, `Err` hands back a command
    /// whose retry budget is spent.
    pub(crate) fn retry(mut self) -> Result<Self, Self> {
        if self.retries < self.max_retries {
            self.retries += 1;
            Ok(self)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} [{}]", self.description(), self.camera, self.priority)
    }
}

// ── Tests ────────────────────────────────────────────────────────
