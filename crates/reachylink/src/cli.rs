//! Clap derive structures for the `reachylink` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

use reachylink_core::ConnectionMode;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// reachylink -- connect to and supervise a Reachy Mini daemon
#[derive(Debug, Parser)]
#[command(
    name = "reachylink",
    version,
    about = "Connect to a Reachy Mini robot daemon and watch its health and telemetry",
    long_about = "Starts or attaches to the Reachy Mini daemon over USB, Wi-Fi, or in\n\
        simulation, then follows its lifecycle: startup, health checks, crashes,\n\
        hardware faults, and the live telemetry stream.",
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
    /// Robot profile to use
    #[arg(long, short = 'p', env = "REACHYLINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Connection mode (overrides profile)
    #[arg(long, short = 'm', env = "REACHYLINK_MODE", global = true)]
    pub mode: Option<ModeArg>,

    /// Robot hostname or address for the remote mode
    #[arg(long, env = "REACHYLINK_HOST", global = true)]
    pub host: Option<String>,

    /// Serial device for the direct mode
    #[arg(long, env = "REACHYLINK_SERIAL_PORT", global = true)]
    pub serial_port: Option<String>,

    /// Daemon HTTP port
    #[arg(long, env = "REACHYLINK_PORT", global = true)]
    pub port: Option<u16>,

    /// Output format
    #[arg(long, short = 'o', default_value = "text", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Enums ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// USB serial link, daemon launched locally
    Direct,
    /// Daemon running on the robot, reached over the network
    Remote,
    /// Local daemon driving a simulated robot
    Simulated,
}

impl From<ModeArg> for ConnectionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Direct => Self::Direct,
            ModeArg::Remote => Self::Remote,
            ModeArg::Simulated => Self::Simulated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect, follow the daemon until interrupted, then disconnect
    #[command(alias = "watch")]
    Connect(ConnectArgs),

    /// Query the daemon status once
    Status,

    /// Manage configuration profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct ConnectArgs {
    /// Disconnect after this many seconds
    #[arg(long, short = 'd')]
    pub duration: Option<u64>,

    /// Also print every telemetry frame
    #[arg(long, short = 't')]
    pub telemetry: bool,

    /// Print captured daemon output when the session ends
    #[arg(long)]
    pub logs: bool,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the loaded configuration
    Show,

    /// Print the config file location
    Path,

    /// Add or replace a profile
    AddProfile {
        /// Profile name
        name: String,

        /// Connection mode of the profile
        #[arg(long = "profile-mode", value_name = "MODE")]
        mode: ModeArg,

        /// Robot hostname (remote profiles)
        #[arg(long = "profile-host", value_name = "HOST")]
        host: Option<String>,

        /// Serial device (direct profiles; detected over USB when omitted)
        #[arg(long = "profile-serial-port", value_name = "DEVICE")]
        serial_port: Option<String>,

        /// Make this the default profile
        #[arg(long)]
        default: bool,
    },

    /// Remove a profile
    RemoveProfile {
        /// Profile name
        name: String,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
