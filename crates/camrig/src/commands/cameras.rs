//! Camera listing.

use tabled::Tabled;

use camrig_core::{AddressBook, CameraEntry, FleetController};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct CameraRow {
    #[tabled(rename = "ID")]
    id: u8,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Role")]
    role: &'static str,
    #[tabled(rename = "RAW")]
    raw: &'static str,
    #[tabled(rename = "RAW on")]
    raw_on: &'static str,
    #[tabled(rename = "Control")]
    control: String,
    #[tabled(rename = "Still")]
    still: u16,
}

impl CameraRow {
    fn new(book: &AddressBook, entry: &CameraEntry) -> Self {
        let ports = book.ports_for(entry.address);
        Self {
            id: entry.id.get(),
            name: entry.id.to_string(),
            address: entry.address.to_string(),
            role: if entry.local { "local" } else { "remote" },
            raw: if entry.raw_capable { "yes" } else { "-" },
            raw_on: if book.raw_enabled(entry.id) { "yes" } else { "-" },
            control: format!("{} / {}", ports.control, ports.video_control),
            still: ports.still,
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

#[allow(clippy::unnecessary_wraps)]
pub fn handle(fleet: &FleetController, global: &GlobalOpts) -> Result<(), CliError> {
    let book = fleet.address_book();
    let out = output::render_list(
        &global.output,
        book.cameras(),
        |entry| CameraRow::new(book, entry),
        |entry| entry.id.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
