//! Power and reset handlers. All of them ask first unless `--yes`.

use camrig_core::{CameraId, FleetController};

use crate::cli::{GlobalOpts, SystemArgs, SystemCommand, TargetArgs};
use crate::error::CliError;

use super::util;

pub async fn handle(
    fleet: &FleetController,
    args: SystemArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        SystemCommand::Shutdown(target) => {
            power(
                fleet,
                global,
                &target,
                "shut down",
                FleetController::shutdown_camera,
                FleetController::shutdown_all,
            )
            .await
        }
        SystemCommand::Reboot(target) => {
            power(
                fleet,
                global,
                &target,
                "reboot",
                FleetController::reboot_camera,
                FleetController::reboot_all,
            )
            .await
        }
        SystemCommand::FactoryReset(target) => {
            power(
                fleet,
                global,
                &target,
                "factory reset",
                FleetController::factory_reset,
                factory_reset_remote,
            )
            .await
        }
    }
}

fn factory_reset_remote(fleet: &FleetController) -> usize {
    let mut queued = 0;
    for camera in CameraId::remote() {
        fleet.factory_reset(camera);
        queued += 1;
    }
    queued
}

/// `--all` covers the remote cameras only: the local camera is the
/// controller host itself.
async fn power(
    fleet: &FleetController,
    global: &GlobalOpts,
    target: &TargetArgs,
    verb: &str,
    one: fn(&FleetController, CameraId) -> usize,
    all: fn(&FleetController) -> usize,
) -> Result<(), CliError> {
    let cameras: Vec<CameraId> = if target.all {
        CameraId::remote().collect()
    } else {
        util::targets(target)?
    };

    let names: Vec<String> = cameras.iter().map(ToString::to_string).collect();
    let prompt = format!("{verb} {}?", names.join(", "));
    if !util::confirm(&prompt, verb, global.yes)? {
        return Ok(());
    }

    util::send_queued(fleet, global, verb, &cameras, |fleet| {
        if target.all {
            return Ok(all(fleet));
        }
        for &camera in &cameras {
            one(fleet, camera);
        }
        Ok(cameras.len())
    })
    .await
}
