//! Per-user directories for TaskMate files.

use std::path::PathBuf;

use crate::constants::APP_NAME;
use crate::error::{TmError, TmResult};

/// Where `config.toml` lives, e.g. `~/.config/TaskMate` on Linux.
pub fn config_dir() -> TmResult<PathBuf> {
    dirs::config_dir()
        .map(|base| base.join(APP_NAME))
        .ok_or_else(|| TmError::Config("could not determine config directory".into()))
}

/// Where logs are written by default, e.g. `~/.local/share/TaskMate` on Linux.
pub fn data_dir() -> TmResult<PathBuf> {
    dirs::data_dir()
        .map(|base| base.join(APP_NAME))
        .ok_or_else(|| TmError::Config("could not determine data directory".into()))
}
