//! Shared configuration for the camrig tools.
//!
//! TOML profiles layered with `CAMRIG_` environment variables, and
//! translation to `camrig_core::FleetConfig`. The CLI adds flag-aware
//! wrappers on top.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use camrig_core::{CameraId, FleetConfig, PortSet, TransportMode};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named fleet profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// The named profile, or the default profile when `name` is `None`.
    /// A missing default profile yields stock fleet settings.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, Profile), ConfigError> {
        match name {
            Some(name) => self
                .profiles
                .get(name)
                .cloned()
                .map(|p| (name.to_owned(), p))
                .ok_or_else(|| ConfigError::UnknownProfile { name: name.into() }),
            None => {
                let name = self.default_profile.clone().unwrap_or_else(|| "default".into());
                let profile = self.profiles.get(&name).cloned().unwrap_or_default();
                Ok((name, profile))
            }
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// "real" or "mock".
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Where received stills are written when no directory is given.
    #[serde(default)]
    pub image_dir: Option<PathBuf>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            mode: default_mode(),
            image_dir: None,
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_mode() -> String {
    "real".into()
}

/// Per-channel port overrides; unset entries keep the stock port.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PortOverrides {
    pub control: Option<u16>,
    pub video: Option<u16>,
    pub video_control: Option<u16>,
    pub still: Option<u16>,
    pub heartbeat: Option<u16>,
}

impl PortOverrides {
    fn apply(&self, base: PortSet) -> PortSet {
        PortSet {
            control: self.control.unwrap_or(base.control),
            video: self.video.unwrap_or(base.video),
            video_control: self.video_control.unwrap_or(base.video_control),
            still: self.still.unwrap_or(base.still),
            heartbeat: self.heartbeat.unwrap_or(base.heartbeat),
        }
    }
}

/// A named fleet profile. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Network of the remote cameras (e.g., "192.168.0.0").
    pub base_network: Option<String>,

    /// Camera `n` is reached at host `host_offset + n`.
    pub host_offset: Option<u8>,

    /// Address of the local camera.
    pub local_address: Option<String>,

    /// Controller's LAN address, attributed to the local camera.
    /// Empty or "none" disables the alias.
    pub controller_alias: Option<String>,

    /// Interface the receivers listen on.
    pub bind_address: Option<String>,

    /// Camera ids able to deliver RAW (DNG) captures.
    pub raw_capable: Option<Vec<u8>>,

    pub max_retries: Option<u32>,
    pub critical_max_retries: Option<u32>,

    pub heartbeat_timeout_secs: Option<u64>,
    pub send_timeout_ms: Option<u64>,
    pub still_read_timeout_secs: Option<u64>,

    /// Requested kernel receive buffer for video, in bytes.
    pub video_recv_buffer: Option<usize>,

    /// Overrides `defaults.mode`.
    pub mode: Option<String>,

    /// Overrides `defaults.image_dir`.
    pub image_dir: Option<PathBuf>,

    #[serde(default)]
    pub remote_ports: PortOverrides,

    #[serde(default)]
    pub local_ports: PortOverrides,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "camrig", "camrig").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("camrig");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file + environment. A missing file is not an
/// error. Nested keys use a double underscore, e.g.
/// `CAMRIG_DEFAULTS__MODE=mock`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("CAMRIG_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

fn parse_ipv4(field: &str, raw: &str) -> Result<Ipv4Addr, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(field, format!("'{raw}' is not an IPv4 address")))
}

pub fn parse_mode(raw: &str) -> Result<TransportMode, ConfigError> {
    raw.parse()
        .map_err(|_| invalid("mode", format!("expected 'real' or 'mock', got '{raw}'")))
}

/// Build a `FleetConfig` from a profile and the global defaults.
pub fn profile_to_fleet_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<FleetConfig, ConfigError> {
    let mut fleet = FleetConfig::default();

    if let Some(ref raw) = profile.base_network {
        let base = parse_ipv4("base_network", raw)?;
        if base.octets()[3] != 0 {
            return Err(invalid(
                "base_network",
                format!("'{raw}' must end in .0 (cameras are placed by host offset)"),
            ));
        }
        fleet.base_network = base;
    }
    if let Some(offset) = profile.host_offset {
        fleet.host_offset = offset;
    }
    if let Some(ref raw) = profile.local_address {
        fleet.local_address = parse_ipv4("local_address", raw)?;
    }
    if let Some(ref raw) = profile.controller_alias {
        let raw = raw.trim();
        fleet.controller_alias = if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(parse_ipv4("controller_alias", raw)?)
        };
    }
    if let Some(ref raw) = profile.bind_address {
        fleet.bind_address = raw
            .trim()
            .parse::<IpAddr>()
            .map_err(|_| invalid("bind_address", format!("'{raw}' is not an IP address")))?;
    }
    if let Some(ref ids) = profile.raw_capable {
        fleet.raw_capable = ids
            .iter()
            .map(|&id| CameraId::new(id).map_err(|e| invalid("raw_capable", e.to_string())))
            .collect::<Result<_, _>>()?;
    }

    fleet.remote_ports = profile.remote_ports.apply(fleet.remote_ports);
    fleet.local_ports = profile.local_ports.apply(fleet.local_ports);

    if let Some(n) = profile.max_retries {
        fleet.max_retries = n;
    }
    if let Some(n) = profile.critical_max_retries {
        fleet.critical_max_retries = n;
    }
    if let Some(secs) = profile.heartbeat_timeout_secs {
        if secs == 0 {
            return Err(invalid("heartbeat_timeout_secs", "must be at least 1"));
        }
        fleet.timing.heartbeat_timeout = Duration::from_secs(secs);
    }
    if let Some(ms) = profile.send_timeout_ms {
        fleet.timing.send_timeout = Duration::from_millis(ms);
    }
    if let Some(secs) = profile.still_read_timeout_secs {
        fleet.timing.still_read_timeout = Duration::from_secs(secs);
    }
    if let Some(bytes) = profile.video_recv_buffer {
        fleet.video_recv_buffer = bytes;
    }

    fleet.mode = parse_mode(profile.mode.as_deref().unwrap_or(&defaults.mode))?;
    Ok(fleet)
}

/// Directory for received stills: profile, then defaults, then `./captures`.
pub fn image_dir(profile: &Profile, defaults: &Defaults) -> PathBuf {
    profile
        .image_dir
        .clone()
        .or_else(|| defaults.image_dir.clone())
        .unwrap_or_else(|| PathBuf::from("captures"))
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn write(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.default_profile.as_deref(), Some("default"));
        assert_eq!(cfg.defaults.output, "table");
        assert!(cfg.profiles.is_empty());
    }

    #[test]
    fn profile_overrides_reach_the_fleet_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"
default_profile = "studio"

[defaults]
mode = "mock"

[profiles.studio]
base_network = "10.1.2.0"
host_offset = 10
controller_alias = "none"
raw_capable = [1, 8]
max_retries = 5
heartbeat_timeout_secs = 9

[profiles.studio.remote_ports]
still = 7000
"#,
        );

        let cfg = load_config_from(&path).unwrap();
        let (name, profile) = cfg.profile(None).unwrap();
        assert_eq!(name, "studio");

        let fleet = profile_to_fleet_config(&profile, &cfg.defaults).unwrap();
        assert_eq!(fleet.base_network, Ipv4Addr::new(10, 1, 2, 0));
        assert_eq!(fleet.host_offset, 10);
        assert_eq!(fleet.controller_alias, None);
        assert_eq!(fleet.raw_capable, vec![CameraId::new(1).unwrap(), CameraId::LOCAL]);
        assert_eq!(fleet.max_retries, 5);
        assert_eq!(fleet.timing.heartbeat_timeout, Duration::from_secs(9));
        assert_eq!(fleet.remote_ports.still, 7000);
        assert_eq!(fleet.remote_ports.control, PortSet::REMOTE.control);
        assert_eq!(fleet.mode, TransportMode::Mock);
    }

    #[test]
    fn profile_mode_wins_over_defaults() {
        let profile = Profile {
            mode: Some("REAL".into()),
            ..Profile::default()
        };
        let defaults = Defaults {
            mode: "mock".into(),
            ..Defaults::default()
        };
        let fleet = profile_to_fleet_config(&profile, &defaults).unwrap();
        assert_eq!(fleet.mode, TransportMode::Real);
    }

    #[test]
    fn bad_values_are_validation_errors() {
        let defaults = Defaults::default();
        let cases = [
            Profile {
                base_network: Some("10.0.0".into()),
                ..Profile::default()
            },
            Profile {
                base_network: Some("10.0.0.5".into()),
                ..Profile::default()
            },
            Profile {
                raw_capable: Some(vec![9]),
                ..Profile::default()
            },
            Profile {
                mode: Some("simulated".into()),
                ..Profile::default()
            },
        ];
        for profile in &cases {
            assert!(
                matches!(
                    profile_to_fleet_config(profile, &defaults),
                    Err(ConfigError::Validation { .. })
                ),
                "{profile:?}"
            );
        }
    }

    #[test]
    fn unknown_named_profile_is_an_error() {
        let cfg = Config::default();
        assert!(matches!(
            cfg.profile(Some("lab")),
            Err(ConfigError::UnknownProfile { .. })
        ));
        let (name, _) = cfg.profile(None).unwrap();
        assert_eq!(name, "default");
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "default".into(),
            Profile {
                host_offset: Some(100),
                ..Profile::default()
            },
        );
        save_config_to(&cfg, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.profiles["default"].host_offset, Some(100));
    }

    #[test]
    fn image_dir_falls_back_in_order() {
        let mut defaults = Defaults::default();
        let mut profile = Profile::default();
        assert_eq!(image_dir(&profile, &defaults), PathBuf::from("captures"));
        defaults.image_dir = Some("/srv/stills".into());
        assert_eq!(image_dir(&profile, &defaults), PathBuf::from("/srv/stills"));
        profile.image_dir = Some("/tmp/rig".into());
        assert_eq!(image_dir(&profile, &defaults), PathBuf::from("/tmp/rig"));
    }
}
