//! Config subcommand handlers.

use stationlink_config::{Config, save_config_to};

use super::Context;
use crate::cli::{ConfigArgs, ConfigCommand, OutputFormat};
use crate::error::CliError;
use crate::output;

pub fn handle(args: &ConfigArgs, ctx: &Context) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Show => {
            let rendered = match ctx.output {
                OutputFormat::Json => output::render_json(&ctx.config, false)?,
                OutputFormat::JsonCompact => output::render_json(&ctx.config, true)?,
                OutputFormat::Yaml => output::render_yaml(&ctx.config)?,
                OutputFormat::Table | OutputFormat::Plain => toml::to_string_pretty(&ctx.config)
                    .map_err(|e| CliError::Render(e.to_string()))?,
            };
            ctx.print(&rendered);
        }

        ConfigCommand::Path => ctx.print(&ctx.config_path.display().to_string()),

        ConfigCommand::Init { force } => {
            let path = &ctx.config_path;
            if path.exists() && !force {
                return Err(CliError::Validation {
                    field: "config".into(),
                    reason: format!("{} already exists (use --force to overwrite)", path.display()),
                });
            }
            // Keep a --server override; everything else starts from defaults.
            let mut config = Config::default();
            config.server.url.clone_from(&ctx.config.server.url);
            stationlink_config::parse_server_url(&config.server.url)?;
            save_config_to(&config, path)?;
            ctx.print(&format!("Wrote {}", path.display()));
        }
    }
    Ok(())
}
