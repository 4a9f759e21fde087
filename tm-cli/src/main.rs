//! TaskMate CLI - terminal client for the TaskMate chat endpoint.
//!
//! Holds one resilient WebSocket connection to the TaskMate server, prints
//! what arrives, and sends what is typed. Also useful for diagnosing the
//! endpoint and managing the local configuration file.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use tm_core::config::{AppConfig, ConfigHandle};
use tm_core::error::TmResult;
use tm_core::logging;

/// TaskMate - chat with the TaskMate assistant from the terminal.
#[derive(Parser)]
#[command(
    name = "taskmate",
    version,
    about = "TaskMate chat client CLI",
    long_about = "A command-line client for the TaskMate chat endpoint.\n\
                  Keeps a WebSocket connection open with automatic reconnection."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the chat endpoint and stay connected.
    Connect {
        /// Server address (overrides config).
        #[arg(short, long)]
        address: Option<String>,
        /// Credential token (overrides config).
        #[arg(short, long)]
        token: Option<String>,
        /// Save connection settings to the config file.
        #[arg(long)]
        save: bool,
    },
    /// Open one connection, exchange a test message, and report.
    Diagnose {
        /// Server address (overrides config).
        #[arg(short, long)]
        address: Option<String>,
        /// Credential token (overrides config).
        #[arg(short, long)]
        token: Option<String>,
        /// Give up after this many seconds.
        #[arg(long, default_value = "10")]
        timeout_secs: u64,
    },
    /// Inspect or create the configuration file.
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> TmResult<()> {
    let cli = Cli::parse();

    // Resolve the config file before logging so its logging section applies
    let config_path = match cli.config.as_deref() {
        Some(path) => PathBuf::from(path),
        None => AppConfig::default_config_path().unwrap_or_else(|_| PathBuf::from("config.toml")),
    };
    let config = if config_path.exists() {
        AppConfig::load_from_file(&config_path)?
    } else {
        AppConfig::default()
    };

    let _guard = logging::init_logging(&config, cli.verbose)?;

    let config_handle = ConfigHandle::new(config);

    info!("TaskMate CLI v{}", tm_core::constants::APP_VERSION);

    match cli.command {
        Commands::Connect { address, token, save } => {
            commands::connect::run(config_handle, &config_path, address, token, save, cli.format).await
        }
        Commands::Diagnose { address, token, timeout_secs } => {
            commands::diagnose::run(config_handle, address, token, timeout_secs, cli.format).await
        }
        Commands::Config { action } => {
            commands::config::run(config_handle, &config_path, action, cli.format).await
        }
    }
}
