//! CLI configuration: a thin wrapper around `camrig_config` shared types.
//!
//! Adds profile selection from `--profile` and the `--mock` override on
//! top of the shared loader.

use std::path::PathBuf;

use camrig_core::{FleetConfig, TransportMode};

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use camrig_config::{Config, Profile, config_path, load_config, save_config};

// ── CLI-specific helpers ────────────────────────────────────────────

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Everything a fleet command needs from configuration.
#[derive(Debug)]
pub struct Resolved {
    pub profile_name: String,
    pub fleet: FleetConfig,
    pub image_dir: PathBuf,
}

/// Load the config file and translate the active profile.
///
/// An explicitly requested profile must exist; the default profile may
/// be absent, in which case stock fleet settings apply.
pub fn resolve(global: &GlobalOpts) -> Result<Resolved, CliError> {
    let cfg = load_config()?;

    let missing = global
        .profile
        .as_deref()
        .filter(|name| !cfg.profiles.contains_key(*name));
    if let Some(name) = missing {
        return Err(CliError::ProfileNotFound {
            name: name.into(),
            available: profile_list(&cfg),
        });
    }

    let (profile_name, profile) = cfg.profile(global.profile.as_deref())?;
    let mut fleet = camrig_config::profile_to_fleet_config(&profile, &cfg.defaults)?;
    if global.mock {
        fleet.mode = TransportMode::Mock;
    }

    Ok(Resolved {
        profile_name,
        fleet,
        image_dir: camrig_config::image_dir(&profile, &cfg.defaults),
    })
}

/// Comma-separated profile names, sorted, for help text.
pub fn profile_list(cfg: &Config) -> String {
    let mut names: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
    if names.is_empty() {
        return "(none)".into();
    }
    names.sort_unstable();
    names.join(", ")
}
