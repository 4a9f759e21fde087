//! Config commands.

use std::path::Path;

use clap::Subcommand;
use console::style;

use tm_core::config::{AppConfig, ConfigHandle};
use tm_core::error::TmResult;

use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration (token masked).
    Show,
    /// Print the config file path.
    Path,
    /// Write a config file with defaults and the given server settings.
    Init {
        /// Server address.
        #[arg(short, long)]
        address: Option<String>,
        /// Credential token.
        #[arg(short, long)]
        token: Option<String>,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

pub async fn run(
    config: ConfigHandle,
    config_path: &Path,
    action: ConfigAction,
    format: OutputFormat,
) -> TmResult<()> {
    match action {
        ConfigAction::Show => {
            let mut cfg = config.read().await.clone();
            cfg.server.token = mask(&cfg.server.token);
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&cfg)?),
                OutputFormat::Text => {
                    println!("{}", style("Configuration").bold().underlined());
                    println!("  File:              {}", config_path.display());
                    println!("  Server address:    {}", cfg.server.address);
                    println!("  Token:             {}", cfg.server.token);
                    println!("  Max attempts:      {}", cfg.reconnect.max_attempts);
                    println!("  Initial delay:     {} ms", cfg.reconnect.initial_delay_ms);
                    println!("  Max delay:         {} ms", cfg.reconnect.max_delay_ms);
                    println!("  Decay:             {}", cfg.reconnect.decay);
                    println!("  Jitter:            {} ms", cfg.reconnect.jitter_ms);
                    println!("  Auto connect:      {}", cfg.reconnect.auto_connect);
                    println!("  Log level:         {}", cfg.logging.level);
                }
            }
        }
        ConfigAction::Path => println!("{}", config_path.display()),
        ConfigAction::Init { address, token, force } => {
            if config_path.exists() && !force {
                println!(
                    "  {} {} already exists (use --force to overwrite)",
                    style("SKIP").yellow(),
                    config_path.display()
                );
                return Ok(());
            }
            let mut cfg = AppConfig::default();
            if let Some(address) = address {
                cfg.server.address = AppConfig::sanitize_server_address(&address);
            }
            if let Some(token) = token {
                cfg.server.token = token;
            }
            cfg.save_to_file(config_path)?;
            println!("  {} Config written to {}", style("OK").green(), config_path.display());
        }
    }
    Ok(())
}

fn mask(token: &str) -> String {
    if token.is_empty() {
        "(not set)".to_string()
    } else {
        "********".to_string()
    }
}
