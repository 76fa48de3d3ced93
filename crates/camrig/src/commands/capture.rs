//! Still capture: trigger, then optionally wait for the images.

use std::time::Duration;

use tabled::Tabled;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, timeout_at};
use tracing::{info, warn};

use camrig_core::{FleetController, FleetEvent, TransportMode};

use crate::cli::{CaptureArgs, GlobalOpts};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

use super::util::{self, SavedCapture};

#[derive(Tabled)]
struct SavedRow {
    #[tabled(rename = "Camera")]
    camera: String,
    #[tabled(rename = "JPEG")]
    jpeg: String,
    #[tabled(rename = "DNG")]
    dng: String,
    #[tabled(rename = "Bytes")]
    bytes: usize,
}

impl From<&SavedCapture> for SavedRow {
    fn from(s: &SavedCapture) -> Self {
        Self {
            camera: s.camera.to_string(),
            jpeg: s.jpeg.display().to_string(),
            dng: s
                .dng
                .as_ref()
                .map_or_else(|| "-".into(), |p| p.display().to_string()),
            bytes: s.bytes,
        }
    }
}

pub async fn handle(
    fleet: &FleetController,
    args: CaptureArgs,
    resolved: &Resolved,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let cameras = util::targets(&args.target)?;
    let enqueue = |fleet: &FleetController| -> Result<usize, CliError> {
        if args.target.all {
            return Ok(fleet.capture_all());
        }
        for &camera in &cameras {
            fleet.capture(camera);
        }
        Ok(cameras.len())
    };

    if args.wait == 0 {
        return util::send_queued(fleet, global, "capture", &cameras, enqueue).await;
    }
    if fleet.mode() == TransportMode::Mock {
        warn!("mock mode sends nothing, so no images will arrive; not waiting");
        return util::send_queued(fleet, global, "capture", &cameras, enqueue).await;
    }

    let dir = args.out.clone().unwrap_or_else(|| resolved.image_dir.clone());
    let mut events = fleet.subscribe();
    fleet.start().await?;
    let mut expected = enqueue(fleet)?;

    let deadline = Instant::now() + Duration::from_secs(args.wait);
    let mut saved = Vec::new();
    let mut failed = 0;
    let mut write_error = None;

    while saved.len() < expected {
        match timeout_at(deadline, events.recv()).await {
            Err(_) | Ok(Err(RecvError::Closed)) => break,
            Ok(Err(RecvError::Lagged(skipped))) => {
                warn!(skipped, "event buffer overflowed while waiting for stills");
            }
            Ok(Ok(FleetEvent::Still(capture))) => match util::save_capture(&capture, &dir) {
                Ok(s) => {
                    info!(camera = %s.camera, path = %s.jpeg.display(), "still saved");
                    saved.push(s);
                }
                Err(e) => {
                    write_error = Some(e);
                    break;
                }
            },
            Ok(Ok(event)) => {
                if util::log_failure(&event) {
                    failed += 1;
                    expected = expected.saturating_sub(1);
                }
            }
        }
    }

    fleet.shutdown().await;
    if let Some(e) = write_error {
        return Err(e);
    }

    let out = output::render_list(
        &global.output,
        &saved,
        |s| SavedRow::from(s),
        |s| s.jpeg.display().to_string(),
    );
    output::print_output(&out, global.quiet);

    if failed > 0 {
        return Err(CliError::SendFailed { count: failed });
    }
    if saved.len() < expected {
        warn!(
            received = saved.len(),
            expected,
            "not every camera delivered an image within {}s",
            args.wait
        );
        return Err(CliError::Timeout { seconds: args.wait });
    }
    Ok(())
}
