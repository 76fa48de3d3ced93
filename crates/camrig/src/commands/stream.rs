//! Video stream handlers.

use camrig_core::{CameraId, FleetController};

use crate::cli::{GlobalOpts, StreamArgs, StreamCommand, TargetArgs};
use crate::error::CliError;

use super::util;

type PerCamera = fn(&FleetController, CameraId) -> usize;
type Fleetwide = fn(&FleetController) -> usize;

pub async fn handle(
    fleet: &FleetController,
    args: StreamArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let (action, target, one, all): (&str, TargetArgs, PerCamera, Fleetwide) = match args.command
    {
        StreamCommand::Start(t) => (
            "start stream",
            t,
            FleetController::start_stream,
            FleetController::start_all_streams,
        ),
        StreamCommand::Stop(t) => (
            "stop stream",
            t,
            FleetController::stop_stream,
            FleetController::stop_all_streams,
        ),
        StreamCommand::Restart(t) => (
            "restart stream",
            t,
            FleetController::restart_stream_with_settings,
            FleetController::restart_all_streams,
        ),
    };

    let cameras = util::targets(&target)?;
    util::send_queued(fleet, global, action, &cameras, |fleet| {
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
