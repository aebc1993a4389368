//! Clap derive structures for the `stationlink` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use stationlink_core::StationId;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// stationlink -- realtime machine state from the factory floor
#[derive(Debug, Parser)]
#[command(
    name = "stationlink",
    version,
    about = "Watch and drive factory-floor stations over the realtime telemetry link",
    long_about = "Connects to the plant telemetry server over WebSocket, streams\n\
        machine updates for a station, sends operator commands, and inspects\n\
        the local station cache.",
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
    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "STATIONLINK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Telemetry server URL (overrides the config file)
    #[arg(long, short = 's', global = true)]
    pub server: Option<String>,

    /// Output format [default: from config, else table]
    #[arg(long, short = 'o', env = "STATIONLINK_OUTPUT", global = true)]
    pub output: Option<OutputFormat>,

    /// When to use color output
    #[arg(long, global = true)]
    pub color: Option<ColorMode>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stream live events for one station
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Send an operator command and wait for the server's answer
    Send(SendArgs),

    /// Inspect the local station cache
    #[command(alias = "c")]
    Cache(CacheArgs),

    /// Check a server URL for common deployment problems
    Diagnose(DiagnoseArgs),

    /// Show or create the config file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Station (machine) id
    pub station: StationId,

    /// Exit after this many events
    #[arg(long, short = 'n')]
    pub count: Option<usize>,

    /// Exit after this many seconds
    #[arg(long)]
    pub duration: Option<u64>,

    /// Give up instead of reconnecting when the socket drops
    #[arg(long)]
    pub no_reconnect: bool,
}

// ── Send ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Seconds to wait for the connection and for the answer
    #[arg(long, default_value = "10", global = true)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: SendCommand,
}

#[derive(Debug, Subcommand)]
pub enum SendCommand {
    /// Open (or resume) an operator session
    StartSession {
        #[arg(long)]
        station: StationId,
        #[arg(long)]
        operator: u64,
        #[arg(long)]
        shift: u64,
        /// Resume this session instead of opening a new one
        #[arg(long)]
        session: Option<u64>,
    },

    /// Close the operator session
    EndSession {
        #[arg(long)]
        station: StationId,
    },

    /// Ask for the station's session status
    QuerySession {
        #[arg(long)]
        station: StationId,
    },

    /// Start a production map item
    StartProduction {
        #[arg(long)]
        station: StationId,
        #[arg(long)]
        map: u64,
        #[arg(long)]
        product: u64,
        /// Quantity to produce
        #[arg(long)]
        quantity: Option<u64>,
        #[arg(long)]
        map_item: Option<u64>,
        #[arg(long)]
        color: Option<u64>,
        #[arg(long)]
        die: Option<u64>,
    },

    /// Finish the production map, keeping it open for later
    FinishPartial {
        #[arg(long)]
        station: StationId,
    },

    /// Finish the production map for good
    FinishComplete {
        #[arg(long)]
        station: StationId,
    },

    /// Ask for the station's production map
    QueryMap {
        #[arg(long)]
        station: StationId,
    },

    /// Ask for the machine's current state
    QueryMachine {
        #[arg(long)]
        station: StationId,
    },

    /// Count one reject on the station
    AddReject {
        #[arg(long)]
        station: StationId,
    },

    /// Assign a reason to a recorded stop
    StopReason {
        #[arg(long)]
        stop: u64,
        #[arg(long)]
        reason: u64,
    },
}

// ── Cache ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// List fresh stations, or show one
    #[command(alias = "ls")]
    Show {
        /// Station id
        station: Option<StationId>,
    },

    /// List the fresh child stations of a multi-station machine
    Children {
        /// Parent machine id
        parent: StationId,
    },

    /// Show recently received messages, newest first
    Messages {
        /// Only this message type (machine_update, production_alert)
        #[arg(long = "type", short = 't')]
        kind: Option<String>,

        /// Only messages from or to this station
        #[arg(long)]
        station: Option<StationId>,

        /// Max messages to show
        #[arg(long, short = 'l', default_value = "50")]
        limit: usize,
    },

    /// Show cache statistics
    Stats,

    /// Dump the whole cache, stale records included
    Export,

    /// Remove expired stations and messages now
    Sweep,

    /// Delete every cached record and the snapshot file
    Clear,
}

// ── Diagnose ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DiagnoseArgs {
    /// URL to check (defaults to the configured server)
    pub url: Option<String>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,

    /// Print the config file path
    Path,

    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
