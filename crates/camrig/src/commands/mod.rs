//! Command dispatch: bridges CLI args -> fleet operations -> output formatting.

pub mod cameras;
pub mod capture;
pub mod config_cmd;
pub mod monitor;
pub mod raw;
pub mod settings;
pub mod status;
pub mod stream;
pub mod system;
pub mod util;

use camrig_core::FleetController;

use crate::cli::{Command, GlobalOpts};
use crate::config::Resolved;
use crate::error::CliError;

/// Dispatch a fleet-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    fleet: &FleetController,
    resolved: &Resolved,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Cameras => cameras::handle(fleet, global),
        Command::Capture(args) => capture::handle(fleet, args, resolved, global).await,
        Command::Stream(args) => stream::handle(fleet, args, global).await,
        Command::Settings(args) => settings::handle(fleet, args, global).await,
        Command::Raw(args) => raw::handle(fleet, args, global).await,
        Command::System(args) => system::handle(fleet, args, global).await,
        Command::Status(args) => status::handle(fleet, args, global).await,
        Command::Monitor(args) => monitor::handle(fleet, args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}
