//! Application configuration management.
//!
//! Handles loading, saving, and validating the configuration for the
//! persistent connection: server address, credential token, reconnect
//! policy, and logging preferences. Configuration is persisted as TOML.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{TmError, TmResult};
use crate::platform;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server connection settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Reconnection policy.
    #[serde(default)]
    pub reconnect: ReconnectSettings,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// WebSocket endpoint (e.g., "ws://localhost:9000/chat").
    #[serde(default)]
    pub address: String,

    /// Credential token appended to the endpoint as a query parameter.
    #[serde(default)]
    pub token: String,
}

/// Reconnection policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Maximum consecutive reconnection attempts before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first reconnection attempt, in milliseconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Cap on the exponential delay term, in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Multiplier applied per attempt.
    #[serde(default = "default_decay")]
    pub decay: f64,

    /// Upper bound of the random jitter added to each delay, in milliseconds.
    #[serde(default = "default_jitter")]
    pub jitter_ms: u64,

    /// Connect as soon as the connection owner is created.
    #[serde(default = "default_true")]
    pub auto_connect: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde
fn default_max_attempts() -> u32 {
    constants::reconnect::MAX_ATTEMPTS
}

fn default_initial_delay() -> u64 {
    constants::reconnect::INITIAL_DELAY_MS
}

fn default_max_delay() -> u64 {
    constants::reconnect::MAX_DELAY_MS
}

fn default_decay() -> f64 {
    constants::reconnect::DECAY
}

fn default_jitter() -> u64 {
    constants::reconnect::JITTER_MS
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            decay: default_decay(),
            jitter_ms: default_jitter(),
            auto_connect: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl ReconnectSettings {
    /// Reject settings that would make the backoff sequence meaningless.
    pub fn validate(&self) -> TmResult<()> {
        if !self.decay.is_finite() || self.decay < 1.0 {
            return Err(TmError::Config(format!(
                "reconnect.decay must be a finite number >= 1.0, got {}",
                self.decay
            )));
        }
        if self.initial_delay_ms == 0 {
            return Err(TmError::Config(
                "reconnect.initial_delay_ms must be greater than zero".into(),
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(TmError::Config(format!(
                "reconnect.max_delay_ms ({}) is below initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            )));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from the default config file path.
    pub fn load_default() -> TmResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> TmResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> TmResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| TmError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> TmResult<PathBuf> {
        let config_dir = platform::config_dir()?;
        Ok(config_dir.join("config.toml"))
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> TmResult<PathBuf> {
        if self.logging.directory.is_empty() {
            let data_dir = platform::data_dir()?;
            Ok(data_dir.join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Check whether both the address and the credential are present.
    pub fn is_server_configured(&self) -> bool {
        !self.server.address.is_empty() && !self.server.token.is_empty()
    }

    /// Validate all sections.
    pub fn validate(&self) -> TmResult<()> {
        self.reconnect.validate()
    }

    /// Sanitize and normalize a server address.
    ///
    /// Strips whitespace, quotes, and trailing slashes, adds `ws://` when
    /// no scheme is given, and maps http(s) onto ws(s).
    pub fn sanitize_server_address(address: &str) -> String {
        let trimmed = address.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let with_scheme = if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
            trimmed.to_string()
        } else if let Some(rest) = trimmed.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = trimmed.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{trimmed}")
        };

        with_scheme.trim_end_matches('/').to_string()
    }
}

/// Thread-safe configuration holder for shared access.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().await
    }

    /// Save the current configuration to the given path.
    pub async fn save_to(&self, path: &Path) -> TmResult<()> {
        let config = self.inner.read().await;
        config.save_to_file(path)
    }
}
