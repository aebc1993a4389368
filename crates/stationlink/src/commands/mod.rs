//! Command dispatch: bridges CLI args -> core calls -> output formatting.

pub mod cache;
pub mod config_cmd;
pub mod diagnose;
pub mod send;
pub mod watch;

use std::path::PathBuf;

use clap::ValueEnum;
use stationlink_config::Config;
use stationlink_core::{ClientConfig, StationStore};

use crate::cli::{ColorMode, Command, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

/// Everything a handler needs besides its own arguments: the effective
/// config (file, env and flags merged) and the resolved output settings.
#[derive(Debug)]
pub struct Context {
    pub config: Config,
    pub config_path: PathBuf,
    pub output: OutputFormat,
    pub color: bool,
    pub quiet: bool,
}

impl Context {
    pub fn load(global: &GlobalOpts) -> Result<Self, CliError> {
        let config_path = global
            .config
            .clone()
            .unwrap_or_else(stationlink_config::config_path);
        let mut config = stationlink_config::load_config_from(&config_path)?;
        if let Some(server) = &global.server {
            config.server.url.clone_from(server);
        }

        let output = global
            .output
            .or_else(|| <OutputFormat as ValueEnum>::from_str(&config.defaults.output, true).ok())
            .unwrap_or(OutputFormat::Table);
        let color = global
            .color
            .or_else(|| <ColorMode as ValueEnum>::from_str(&config.defaults.color, true).ok())
            .unwrap_or(ColorMode::Auto);

        Ok(Self {
            config,
            config_path,
            output,
            color: output::should_color(color),
            quiet: global.quiet,
        })
    }

    pub fn client_config(&self) -> Result<ClientConfig, CliError> {
        Ok(self.config.client_config()?)
    }

    /// The station cache as configured, loaded from its snapshot file.
    pub fn open_store(&self) -> StationStore {
        StationStore::new(self.config.cache_config())
    }

    pub fn print(&self, rendered: &str) {
        output::print_output(rendered, self.quiet);
    }
}

/// Dispatch a command to its handler.
pub async fn dispatch(cmd: Command, ctx: &Context) -> Result<(), CliError> {
    match cmd {
        Command::Watch(args) => watch::handle(args, ctx).await,
        Command::Send(args) => send::handle(args, ctx).await,
        Command::Cache(args) => cache::handle(args, ctx),
        Command::Diagnose(args) => diagnose::handle(&args, ctx),
        Command::Config(args) => config_cmd::handle(&args, ctx),
        // Completions are handled before dispatch
        Command::Completions(_) => Ok(()),
    }
}
