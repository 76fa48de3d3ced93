//! Config subcommand handlers.

use std::io::IsTerminal;

use dialoguer::{Input, Select};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

fn prompt(label: &str, default: &str) -> Result<String, CliError> {
    Input::new()
        .with_prompt(label)
        .default(default.to_owned())
        .interact_text()
        .map_err(prompt_err)
}

/// Ask for the settings that differ between installations. With
/// `--yes` (or no terminal) the stock values are taken as-is.
fn build_profile(interactive: bool) -> Result<(String, Profile), CliError> {
    let mut profile = Profile {
        base_network: Some("192.168.0.0".into()),
        host_offset: Some(200),
        local_address: Some("127.0.0.1".into()),
        controller_alias: Some("192.168.0.200".into()),
        raw_capable: Some(vec![2, 8]),
        mode: Some("real".into()),
        ..Profile::default()
    };
    if !interactive {
        return Ok(("default".into(), profile));
    }

    let name = prompt("Profile name", "default")?;
    profile.base_network = Some(prompt("Camera network (must end in .0)", "192.168.0.0")?);

    let offset = prompt("Host offset (camera N is at offset + N)", "200")?;
    profile.host_offset = Some(offset.trim().parse().map_err(|_| CliError::Validation {
        field: "host_offset".into(),
        reason: format!("'{offset}' is not a number between 0 and 247"),
    })?);

    profile.local_address = Some(prompt("Local camera address", "127.0.0.1")?);
    profile.controller_alias = Some(prompt(
        "This host's LAN address (\"none\" to disable)",
        "192.168.0.200",
    )?);

    let modes = &["real (send to cameras)", "mock (simulate the fleet)"];
    let mode = Select::new()
        .with_prompt("Transport mode")
        .items(modes)
        .default(0)
        .interact()
        .map_err(prompt_err)?;
    profile.mode = Some(if mode == 0 { "real" } else { "mock" }.into());

    Ok((name, profile))
}

fn format_config(cfg: &Config) -> String {
    toml::to_string_pretty(cfg).unwrap_or_else(|e| format!("# could not render config: {e}"))
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Init: guided setup ──────────────────────────────────────
        ConfigCommand::Init => {
            let path = config::config_path();
            let interactive = !global.yes && std::io::stdin().is_terminal();
            if interactive {
                eprintln!("camrig configuration");
                eprintln!("   Config path: {}\n", path.display());
            }

            let mut cfg = if path.exists() {
                config::load_config()?
            } else {
                Config::default()
            };

            let (name, profile) = build_profile(interactive)?;
            // Validate before writing anything.
            camrig_config::profile_to_fleet_config(&profile, &cfg.defaults)?;

            if cfg.profiles.contains_key(&name)
                && !super::util::confirm(
                    &format!("Profile '{name}' exists. Overwrite?"),
                    "config init",
                    global.yes,
                )?
            {
                return Ok(());
            }

            cfg.profiles.insert(name.clone(), profile);
            if cfg.default_profile.is_none() || cfg.profiles.len() == 1 {
                cfg.default_profile = Some(name.clone());
            }
            let written = config::save_config(&cfg)?;

            if !global.quiet {
                eprintln!("Profile '{name}' saved to {}", written.display());
            }
            Ok(())
        }

        // ── Show: resolved config ───────────────────────────────────
        ConfigCommand::Show => {
            let cfg = config::load_config()?;
            let out = output::render_single(&global.output, &cfg, format_config, |c| {
                config::active_profile_name(global, c)
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
            Ok(())
        }

        // ── Profiles: list names, marking the active one ────────────
        ConfigCommand::Profiles => {
            let cfg = config::load_config()?;
            let active = config::active_profile_name(global, &cfg);
            let mut names: Vec<&String> = cfg.profiles.keys().collect();
            names.sort();
            let out = names
                .iter()
                .map(|name| {
                    if **name == active {
                        format!("* {name}")
                    } else {
                        format!("  {name}")
                    }
                })
                .collect::<Vec<_>>()
                .join("\n");
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config()?;
            if !cfg.profiles.contains_key(&name) {
                return Err(CliError::ProfileNotFound {
                    available: config::profile_list(&cfg),
                    name,
                });
            }
            cfg.default_profile = Some(name.clone());
            config::save_config(&cfg)?;
            if !global.quiet {
                eprintln!("Default profile set to '{name}'");
            }
            Ok(())
        }
    }
}
