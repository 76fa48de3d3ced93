//! Liveness report: listen for heartbeats for a while, then print the map.

use std::time::Duration;

use serde::Serialize;
use tabled::Tabled;
use tokio::time::Instant;
use tracing::debug;

use camrig_core::{CameraId, FleetController};

use crate::cli::{GlobalOpts, StatusArgs};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct CameraStatus {
    id: CameraId,
    name: String,
    address: String,
    online: bool,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "ID")]
    id: u8,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Status")]
    status: String,
}

pub async fn handle(
    fleet: &FleetController,
    args: StatusArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let mut statuses = fleet.statuses();
    fleet.start().await?;

    // Stop early once every camera has been heard from.
    let deadline = Instant::now() + Duration::from_secs(args.duration);
    loop {
        if statuses.latest().values().all(|&online| online) {
            break;
        }
        tokio::select! {
            () = tokio::time::sleep_until(deadline) => break,
            _ = tokio::signal::ctrl_c() => break,
            snap = statuses.changed() => match snap {
                Some(snap) => {
                    let online = snap.values().filter(|&&o| o).count();
                    debug!(online, "liveness changed");
                }
                None => break,
            },
        }
    }

    let liveness = fleet.all_statuses();
    fleet.shutdown().await;

    let book = fleet.address_book();
    let report: Vec<CameraStatus> = liveness
        .iter()
        .map(|(&id, &online)| CameraStatus {
            id,
            name: id.to_string(),
            address: book.address_for(id).to_string(),
            online,
        })
        .collect();

    let color = output::should_color(&global.color);
    let out = output::render_list(
        &global.output,
        &report,
        |s| StatusRow {
            id: s.id.get(),
            name: s.name.clone(),
            address: s.address.clone(),
            status: output::liveness(s.online, color),
        },
        |s| format!("{} {}", s.name, if s.online { "online" } else { "offline" }),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
