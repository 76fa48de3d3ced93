//! RAW capture toggles.

use camrig_core::FleetController;

use crate::cli::{GlobalOpts, RawArgs, RawCommand};
use crate::error::CliError;

use super::util;

pub async fn handle(
    fleet: &FleetController,
    args: RawArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let (camera, enabled) = match args.command {
        RawCommand::Enable(arg) => (arg.camera, true),
        RawCommand::Disable(arg) => (arg.camera, false),
    };
    let camera = util::camera_id(camera)?;

    let book = fleet.address_book();
    if !book.raw_capable(camera) {
        let capable: Vec<String> = book
            .raw_capable_cameras()
            .iter()
            .map(ToString::to_string)
            .collect();
        return Err(CliError::RawNotSupported {
            camera: camera.to_string(),
            capable: if capable.is_empty() {
                "(none)".into()
            } else {
                capable.join(", ")
            },
        });
    }

    let action = if enabled { "enable RAW" } else { "disable RAW" };
    util::send_queued(fleet, global, action, &[camera], |fleet| {
        fleet.set_raw_enabled(camera, enabled)?;
        Ok(1)
    })
    .await
}
