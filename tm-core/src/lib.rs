//! TaskMate Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by the other TaskMate crates:
//! - Application configuration (server address, credential, reconnect policy)
//! - Global error type covering all error categories
//! - Structured logging with tracing
//! - Platform directory lookup
//! - Close codes, close reasons, and other protocol constants

pub mod config;
pub mod error;
pub mod logging;
pub mod platform;
pub mod constants;

// Re-export commonly used items at the crate root
pub use config::AppConfig;
pub use error::{TmError, TmResult};
pub use logging::init_logging;
