//! Tracing setup for the TaskMate binaries.
//!
//! Connection lifecycle events go to stderr so stdout stays free for command
//! output, and to a daily-rotated `taskmate.log` for later inspection.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::AppConfig;
use crate::error::{TmError, TmResult};

const LOG_FILE_PREFIX: &str = "taskmate.log";

/// Crates whose output `--verbose` raises to debug.
const VERBOSE_TARGETS: &[&str] = &["tm_core", "tm_socket", "taskmate"];

/// Keeps the background file writer alive. Drop it last to flush.
pub struct LogGuard {
    _writer: WorkerGuard,
}

/// Filter directive for the configured level.
///
/// `verbose` keeps third-party crates at the configured level and raises
/// only the TaskMate crates to debug.
pub fn filter_directive(level: &str, verbose: bool) -> String {
    let level = level.trim();
    let base = if level.is_empty() { "info" } else { level };
    if !verbose {
        return base.to_string();
    }
    VERBOSE_TARGETS
        .iter()
        .fold(base.to_string(), |acc, target| format!("{acc},{target}=debug"))
}

/// Install the global subscriber from the `[logging]` section.
///
/// `RUST_LOG`, when set and valid, replaces the configured level.
pub fn init_logging(config: &AppConfig, verbose: bool) -> TmResult<LogGuard> {
    let log_dir = config.effective_log_dir()?;
    std::fs::create_dir_all(&log_dir)?;

    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(&log_dir, LOG_FILE_PREFIX));

    let directive = filter_directive(&config.logging.level, verbose);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = if config.logging.json_output {
        fmt::layer()
            .with_writer(writer)
            .json()
            .with_current_span(false)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_line_number(true)
            .boxed()
    };
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| TmError::Internal(format!("failed to install subscriber: {e}")))?;

    tracing::debug!(dir = %log_dir.display(), %directive, "logging initialized");
    Ok(LogGuard { _writer: guard })
}
