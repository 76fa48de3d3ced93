//! Live event feed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use camrig_core::{CameraId, FleetController, FleetEvent, VideoFrame};

use crate::cli::{GlobalOpts, MonitorArgs, OutputFormat};
use crate::error::CliError;
use crate::output;

use super::util;

/// One printed event.
#[derive(Debug, Serialize)]
struct EventLine {
    time: String,
    camera: Option<String>,
    event: &'static str,
    detail: String,
}

impl EventLine {
    fn text(&self, color: bool) -> String {
        let camera = self.camera.as_deref().unwrap_or("-");
        let event = match self.event {
            "online" => output::liveness(true, color),
            "offline" => output::liveness(false, color),
            other => other.to_owned(),
        };
        let line = format!("{} {camera:<5} {event:<9} {}", self.time, self.detail);
        if self.event == "frame" {
            output::dim(&line, color)
        } else {
            line
        }
    }
}

fn describe(event: &FleetEvent) -> (&'static str, String) {
    match event {
        FleetEvent::CommandQueued {
            description,
            position,
            priority,
            ..
        } => ("queued", format!("{description} [{priority:?}, #{position}]")),
        FleetEvent::CommandSent {
            description,
            bytes,
            attempts,
            mode,
            ..
        } => (
            "sent",
            format!("{description} ({bytes} bytes, attempt {attempts}, {mode})"),
        ),
        FleetEvent::CommandFailed {
            description,
            error,
            attempts,
            ..
        } => ("failed", format!("{description} after {attempts} attempt(s): {error}")),
        FleetEvent::QueueCleared { count } => ("cleared", format!("{count} queued command(s) dropped")),
        FleetEvent::CameraOnline { .. } => ("online", String::new()),
        FleetEvent::CameraOffline { .. } => ("offline", String::new()),
        FleetEvent::Still(capture) => (
            "still",
            match capture.dng {
                Some(ref dng) => format!("{} bytes JPEG + {} bytes DNG", capture.jpeg.len(), dng.len()),
                None => format!("{} bytes JPEG", capture.jpeg.len()),
            },
        ),
        FleetEvent::ModeChanged { mode } => ("mode", mode.to_string()),
    }
}

fn describe_frame(frame: &VideoFrame) -> (&'static str, String) {
    ("frame", format!("{} bytes", frame.data.len()))
}

/// Next frame, or never when frames were not requested.
async fn next_frame(
    frames: Option<&mut broadcast::Receiver<Arc<VideoFrame>>>,
) -> Result<Arc<VideoFrame>, RecvError> {
    match frames {
        Some(frames) => frames.recv().await,
        None => std::future::pending().await,
    }
}

pub async fn handle(
    fleet: &FleetController,
    args: MonitorArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let mut events = fleet.subscribe();
    let mut frames = args.frames.then(|| fleet.subscribe_frames());
    fleet.start().await?;
    info!(mode = %fleet.mode(), "monitoring fleet events, Ctrl-C to stop");

    let color = output::should_color(&global.color);
    let json = matches!(global.output, OutputFormat::Json | OutputFormat::JsonCompact);

    let until = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(until);

    loop {
        let (camera, (kind, detail)): (Option<CameraId>, _) = tokio::select! {
            () = &mut until => break,
            _ = tokio::signal::ctrl_c() => break,
            recv = events.recv() => match recv {
                Ok(event) => {
                    if let (FleetEvent::Still(capture), Some(dir)) = (&event, args.out.as_deref()) {
                        match util::save_capture(capture, dir) {
                            Ok(saved) => info!(path = %saved.jpeg.display(), "still saved"),
                            Err(e) => error!(camera = %capture.camera, "could not save still: {e}"),
                        }
                    }
                    (event.camera(), describe(&event))
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "monitor fell behind, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
            recv = next_frame(frames.as_mut()) => match recv {
                Ok(frame) => (Some(frame.camera), describe_frame(&frame)),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "frames dropped while printing");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };

        let line = EventLine {
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            camera: camera.map(|c| c.to_string()),
            event: kind,
            detail,
        };
        let rendered = if json {
            output::render_json_line(&line)
        } else {
            line.text(color)
        };
        output::print_output(&rendered, global.quiet);
    }

    fleet.shutdown().await;

    let video = fleet.video_stats();
    let still = fleet.still_stats();
    info!(
        frames = video.frames,
        stills = still.completed,
        failed_stills = still.failed,
        "monitor stopped"
    );
    Ok(())
}
