//! Clap derive structures for the `camrig` CLI.
//!
//! Only clap and clap_complete may be used here: build.rs includes this
//! file directly to render man pages.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// camrig -- drive a fleet of up to eight cameras from one controller
#[derive(Debug, Parser)]
#[command(
    name = "camrig",
    version,
    about = "Control a camera fleet from the command line",
    long_about = "Capture stills, control video streams, push settings and watch\n\
        liveness for a fleet of seven networked cameras plus the local one.\n\n\
        Commands are queued by priority and sent over UDP; stills arrive over TCP.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Fleet profile to use
    #[arg(long, short = 'p', env = "CAMRIG_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Simulate the cameras: nothing is sent, every camera reports online
    #[arg(long, short = 'm', env = "CAMRIG_MOCK", global = true)]
    pub mock: bool,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "CAMRIG_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Log line format on stderr
    #[arg(long, env = "CAMRIG_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Seconds to wait for queued commands to go out before giving up
    #[arg(long, env = "CAMRIG_TIMEOUT", default_value = "10", global = true)]
    pub timeout: u64,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the cameras of the active profile
    #[command(alias = "cams", alias = "ls")]
    Cameras,

    /// Trigger still captures and optionally collect the images
    #[command(alias = "cap")]
    Capture(CaptureArgs),

    /// Start, stop or restart video streams
    Stream(StreamArgs),

    /// Push camera settings
    #[command(alias = "set")]
    Settings(SettingsArgs),

    /// Enable or disable RAW (DNG) capture on a capable camera
    Raw(RawArgs),

    /// Shut down, reboot or factory-reset cameras
    #[command(alias = "sys")]
    System(SystemArgs),

    /// Listen for heartbeats and report which cameras are online
    #[command(alias = "st")]
    Status(StatusArgs),

    /// Print fleet events as they happen
    #[command(alias = "mon")]
    Monitor(MonitorArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Shared Arguments ─────────────────────────────────────────────────

/// One camera or the whole fleet.
#[derive(Debug, Args)]
pub struct TargetArgs {
    /// Camera id (1-8)
    #[arg(
        long,
        short = 'c',
        value_parser = clap::value_parser!(u8).range(1..=8),
        required_unless_present = "all",
        conflicts_with = "all"
    )]
    pub camera: Option<u8>,

    /// Every camera
    #[arg(long, short = 'a')]
    pub all: bool,
}

/// Exactly one camera.
#[derive(Debug, Args)]
pub struct CameraArg {
    /// Camera id (1-8)
    #[arg(long, short = 'c', value_parser = clap::value_parser!(u8).range(1..=8))]
    pub camera: u8,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CAPTURE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CaptureArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Seconds to wait for the images; 0 only sends the trigger
    #[arg(long, short = 'w', default_value = "0")]
    pub wait: u64,

    /// Directory to write received images to (defaults to the profile's image_dir)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  STREAM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct StreamArgs {
    #[command(subcommand)]
    pub command: StreamCommand,
}

#[derive(Debug, Subcommand)]
pub enum StreamCommand {
    /// Start streaming video to this host
    Start(TargetArgs),

    /// Stop streaming
    Stop(TargetArgs),

    /// Restart the stream so pending settings take effect
    Restart(TargetArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  SETTINGS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct SettingsArgs {
    #[command(subcommand)]
    pub command: SettingsCommand,
}

#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    /// Send a JSON settings object as one command
    Apply {
        #[command(flatten)]
        target: TargetArgs,

        /// JSON file holding an object of settings
        #[arg(long, short = 'f')]
        file: PathBuf,
    },

    /// Show the default settings document
    Defaults,

    /// Set a single field (brightness, contrast, saturation, iso, quality,
    /// flip_horizontal, flip_vertical, rotation, grayscale)
    Set {
        #[command(flatten)]
        target: TargetArgs,

        /// Field name
        field: String,

        /// New value; numbers are clamped to the field's range
        #[arg(allow_negative_numbers = true)]
        value: String,
    },

    /// Change the stream resolution and restart the stream
    Resolution {
        #[command(flatten)]
        target: TargetArgs,

        width: u32,
        height: u32,
    },

    /// Set the sensor crop rectangle
    Crop {
        #[command(flatten)]
        target: TargetArgs,

        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  RAW
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct RawArgs {
    #[command(subcommand)]
    pub command: RawCommand,
}

#[derive(Debug, Subcommand)]
pub enum RawCommand {
    /// Send a DNG alongside every JPEG
    Enable(CameraArg),

    /// Send JPEG only
    Disable(CameraArg),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  SYSTEM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct SystemArgs {
    #[command(subcommand)]
    pub command: SystemCommand,
}

#[derive(Debug, Subcommand)]
pub enum SystemCommand {
    /// Power a camera off (--all targets the remote cameras only)
    Shutdown(TargetArgs),

    /// Reboot a camera (--all targets the remote cameras only)
    Reboot(TargetArgs),

    /// Restore factory settings (--all targets the remote cameras only)
    FactoryReset(TargetArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  STATUS / MONITOR
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Seconds to listen for heartbeats before reporting
    #[arg(long, short = 'd', default_value = "6")]
    pub duration: u64,
}

#[derive(Debug, Args)]
pub struct MonitorArgs {
    /// Stop after this many seconds (default: until Ctrl-C)
    #[arg(long, short = 'd')]
    pub duration: Option<u64>,

    /// Write received stills to this directory
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Also print one line per video frame
    #[arg(long)]
    pub frames: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG / COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create the config file with guided setup
    Init,

    /// Display the resolved configuration
    Show,

    /// Print the config file location
    Path,

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to make the default
        name: String,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
