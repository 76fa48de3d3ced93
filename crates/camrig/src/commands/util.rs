//! Shared helpers for command handlers.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::warn;

use camrig_core::{CameraId, FleetController, FleetEvent, StillCapture, TransportMode};

use crate::cli::{GlobalOpts, TargetArgs};
use crate::error::CliError;
use crate::output;

// ── Argument helpers ────────────────────────────────────────────────

pub fn camera_id(raw: u8) -> Result<CameraId, CliError> {
    Ok(CameraId::new(raw)?)
}

/// The cameras a `--camera N | --all` pair selects, in id order.
pub fn targets(target: &TargetArgs) -> Result<Vec<CameraId>, CliError> {
    match target.camera {
        Some(raw) if !target.all => Ok(vec![camera_id(raw)?]),
        _ => Ok(CameraId::all().collect()),
    }
}

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(message: &str, action: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: action.into(),
        });
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))?;
    Ok(confirmed)
}

/// Read a JSON object for `--file` flags.
pub fn read_json_object(path: &Path) -> Result<serde_json::Map<String, serde_json::Value>, CliError> {
    let contents = std::fs::read_to_string(path)?;
    let value: serde_json::Value =
        serde_json::from_str(&contents).map_err(|e| CliError::Validation {
            field: "file".into(),
            reason: format!("invalid JSON: {e}"),
        })?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(CliError::Validation {
            field: "file".into(),
            reason: format!("expected a JSON object, found {}", json_kind(&other)),
        }),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

// ── Send session ────────────────────────────────────────────────────

/// Summary printed after a batch of commands went out.
#[derive(Debug, Serialize)]
pub struct SendReport {
    pub action: String,
    pub cameras: Vec<String>,
    pub commands: usize,
    pub mode: TransportMode,
}

impl SendReport {
    fn detail(&self) -> String {
        let mode = match self.mode {
            TransportMode::Mock => " (mock: nothing sent)",
            TransportMode::Real => "",
        };
        format!(
            "{}: {} command(s) to {}{mode}",
            self.action,
            self.commands,
            self.cameras.join(", ")
        )
    }
}

/// Start the fleet, queue commands with `enqueue`, wait for the queue
/// to drain and shut down.
///
/// `enqueue` returns how many commands it queued. Delivery failures
/// surface as `CliError::SendFailed` once everything else went out.
pub async fn send_queued(
    fleet: &FleetController,
    global: &GlobalOpts,
    action: &str,
    cameras: &[CameraId],
    enqueue: impl FnOnce(&FleetController) -> Result<usize, CliError>,
) -> Result<(), CliError> {
    let mut events = fleet.subscribe();
    fleet.start().await?;

    let commands = match enqueue(fleet) {
        Ok(n) => n,
        Err(e) => {
            fleet.shutdown().await;
            return Err(e);
        }
    };

    let drained = fleet.drain(Duration::from_secs(global.timeout)).await;
    fleet.shutdown().await;
    let failed = take_failures(&mut events);

    if !drained {
        return Err(CliError::Timeout {
            seconds: global.timeout,
        });
    }
    if failed > 0 {
        return Err(CliError::SendFailed { count: failed });
    }

    let report = SendReport {
        action: action.into(),
        cameras: cameras.iter().map(ToString::to_string).collect(),
        commands,
        mode: fleet.mode(),
    };
    let out = output::render_single(
        &global.output,
        &report,
        SendReport::detail,
        |r| r.commands.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

/// Count the `CommandFailed` events already buffered, logging each.
pub fn take_failures(events: &mut broadcast::Receiver<FleetEvent>) -> usize {
    let mut failed = 0;
    loop {
        match events.try_recv() {
            Ok(event) => failed += usize::from(log_failure(&event)),
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "event buffer overflowed, failure count may be low");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    failed
}

/// Log a `CommandFailed` event; true if `event` was one.
pub fn log_failure(event: &FleetEvent) -> bool {
    if let FleetEvent::CommandFailed {
        camera,
        description,
        error,
        attempts,
        ..
    } = event
    {
        warn!(%camera, attempts, "{description} failed: {error}");
        true
    } else {
        false
    }
}

// ── Stills on disk ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct SavedCapture {
    pub camera: CameraId,
    pub jpeg: PathBuf,
    pub dng: Option<PathBuf>,
    pub bytes: usize,
}

/// Write a capture as `<stem>.jpg` and, for RAW captures, `<stem>.dng`.
pub fn save_capture(capture: &StillCapture, dir: &Path) -> Result<SavedCapture, CliError> {
    std::fs::create_dir_all(dir)?;
    let stem = capture.file_stem();

    let jpeg = dir.join(format!("{stem}.jpg"));
    std::fs::write(&jpeg, &capture.jpeg)?;

    let dng = match capture.dng {
        Some(ref data) => {
            let path = dir.join(format!("{stem}.dng"));
            std::fs::write(&path, data)?;
            Some(path)
        }
        None => None,
    };

    Ok(SavedCapture {
        camera: capture.camera,
        jpeg,
        dng,
        bytes: capture.total_bytes(),
    })
}
