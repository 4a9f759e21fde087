//! Global error types for TaskMate.
//!
//! All error categories across the workspace are unified into a single
//! `TmError` enum with conversions from underlying library errors.

use thiserror::Error;

/// Convenience type alias for Results using TmError.
pub type TmResult<T> = Result<T, TmError>;

/// Unified error type covering all error categories in TaskMate.
#[derive(Error, Debug)]
pub enum TmError {
    // -- Configuration errors --
    /// Failed to load, parse, or validate configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Connection errors --
    /// WebSocket transport error.
    #[error("socket error: {0}")]
    Socket(String),

    /// The connection is not open.
    #[error("socket not connected")]
    NotConnected,

    /// The connection state machine rejected an input.
    #[error("invalid transition: {event} while {from}")]
    InvalidTransition {
        /// Status the machine was in.
        from: String,
        /// Input that was rejected.
        event: String,
    },

    /// An operation did not complete in time.
    #[error("timed out: {0}")]
    Timeout(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for TmError {
    fn from(e: serde_json::Error) -> Self {
        TmError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for TmError {
    fn from(e: toml::de::Error) -> Self {
        TmError::Config(e.to_string())
    }
}
