//! Settings handlers.

use std::fmt::Write as _;

use strum::IntoEnumIterator;

use camrig_core::{CameraSettings, CropRegion, FieldSetting, FleetController, SettingField};

use crate::cli::{GlobalOpts, SettingsArgs, SettingsCommand};
use crate::error::CliError;
use crate::output;

use super::util;

fn parse_field(raw: &str) -> Result<SettingField, CliError> {
    raw.trim().parse().map_err(|_| CliError::Validation {
        field: "field".into(),
        reason: format!(
            "unknown setting '{raw}'; expected one of: {}",
            SettingField::iter()
                .map(|f| f.to_string().to_ascii_lowercase())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    })
}

fn settings_detail(map: &serde_json::Map<String, serde_json::Value>) -> String {
    let width = map.keys().map(String::len).max().unwrap_or(0);
    let mut out = String::new();
    for (key, value) in map {
        let _ = writeln!(out, "{key:<width$}  {value}");
    }
    out.trim_end().to_owned()
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    fleet: &FleetController,
    args: SettingsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        SettingsCommand::Defaults => {
            let map = CameraSettings::default().to_map()?;
            let out = output::render_single(&global.output, &map, settings_detail, |m| {
                m.keys().cloned().collect::<Vec<_>>().join("\n")
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        SettingsCommand::Apply { target, file } => {
            let settings = util::read_json_object(&file)?;
            if settings.is_empty() {
                return Err(CliError::Validation {
                    field: "file".into(),
                    reason: "the settings object is empty".into(),
                });
            }
            let cameras = util::targets(&target)?;
            util::send_queued(fleet, global, "apply settings", &cameras, |fleet| {
                for &camera in &cameras {
                    fleet.apply_settings(camera, settings.clone());
                }
                Ok(cameras.len())
            })
            .await
        }

        SettingsCommand::Set {
            target,
            field,
            value,
        } => {
            let setting = FieldSetting::parse(parse_field(&field)?, &value)?;
            let cameras = util::targets(&target)?;
            let action = format!("set {}", field.to_ascii_lowercase());
            util::send_queued(fleet, global, &action, &cameras, |fleet| {
                for &camera in &cameras {
                    fleet.set_field(camera, setting);
                }
                Ok(cameras.len())
            })
            .await
        }

        SettingsCommand::Resolution {
            target,
            width,
            height,
        } => {
            let cameras = util::targets(&target)?;
            let action = format!("resolution {width}x{height}");
            util::send_queued(fleet, global, &action, &cameras, |fleet| {
                for &camera in &cameras {
                    fleet.set_resolution(camera, width, height)?;
                }
                Ok(cameras.len() * 2)
            })
            .await
        }

        SettingsCommand::Crop {
            target,
            x,
            y,
            width,
            height,
        } => {
            let region = CropRegion {
                x,
                y,
                width,
                height,
            };
            let cameras = util::targets(&target)?;
            util::send_queued(fleet, global, "crop", &cameras, |fleet| {
                for &camera in &cameras {
                    fleet.set_crop(camera, region);
                }
                Ok(cameras.len())
            })
            .await
        }
    }
}
