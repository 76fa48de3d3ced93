//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and a stable exit code.

use miette::Diagnostic;
use thiserror::Error;

use camrig_config::ConfigError;
use camrig_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Network ──────────────────────────────────────────────────────

    #[error("Could not listen for {channel} on {address}")]
    #[diagnostic(
        code(camrig::bind_failed),
        help(
            "Another process may own the port, or the address is not on this host.\n\
             Check bind_address and the port overrides in your profile."
        )
    )]
    BindFailed {
        channel: String,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{count} command(s) could not be delivered")]
    #[diagnostic(
        code(camrig::send_failed),
        help("Check that the cameras are powered and reachable. Run: camrig status")
    )]
    SendFailed { count: usize },

    #[error("Commands still queued after {seconds}s")]
    #[diagnostic(
        code(camrig::timeout),
        help("Increase the wait with --timeout, or check the network to the cameras.")
    )]
    Timeout { seconds: u64 },

    // ── Cameras ──────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(camrig::not_found),
        help("Run: camrig {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("Camera {camera} cannot capture RAW")]
    #[diagnostic(
        code(camrig::raw_not_supported),
        help("RAW-capable cameras: {capable}\nChange raw_capable in your profile to add one.")
    )]
    RawNotSupported { camera: String, capable: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(camrig::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(camrig::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: camrig config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error(transparent)]
    #[diagnostic(code(camrig::config))]
    Config(Box<figment::Error>),

    #[error("Could not write configuration: {0}")]
    #[diagnostic(code(camrig::config_write))]
    ConfigWrite(#[from] toml::ser::Error),

    // ── Interactive ──────────────────────────────────────────────────

    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(camrig::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── Internal ─────────────────────────────────────────────────────

    #[error("Fleet is already running")]
    #[diagnostic(code(camrig::already_started))]
    AlreadyStarted,

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(camrig::json), help("Check the JSON file contents and try again."))]
    Json(#[from] serde_json::Error),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BindFailed { .. } | Self::SendFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. }
            | Self::RawNotSupported { .. }
            | Self::NonInteractiveRequiresYes { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidCameraId { value } => CliError::NotFound {
                resource_type: "camera".into(),
                identifier: value.to_string(),
                list_command: "cameras".into(),
            },

            CoreError::UnknownAddress { address } => CliError::NotFound {
                resource_type: "camera".into(),
                identifier: address.to_string(),
                list_command: "cameras".into(),
            },

            CoreError::RawNotSupported { camera } => CliError::RawNotSupported {
                camera: camera.to_string(),
                capable: "see `camrig cameras`".into(),
            },

            CoreError::ValidationFailed { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },

            CoreError::Bind {
                channel,
                address,
                source,
            } => CliError::BindFailed {
                channel: channel.into(),
                address: address.to_string(),
                source,
            },

            CoreError::AlreadyStarted => CliError::AlreadyStarted,

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::Encode(e) => CliError::Json(e),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::UnknownProfile { name } => CliError::ProfileNotFound {
                name,
                available: "(none)".into(),
            },
            ConfigError::Serialization(e) => CliError::ConfigWrite(e),
            ConfigError::Figment(e) => CliError::Config(e),
            ConfigError::Io(e) => CliError::Io(e),
        }
    }
}
