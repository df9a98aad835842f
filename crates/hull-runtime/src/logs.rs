//! Detached-mode container logs.
//!
//! A detached container's stdout and stderr go to
//! `<run>/containers/<name>/container.log`.

use std::fs::File;
use std::path::{Path, PathBuf};

use hull_common::config::HullConfig;
use hull_common::error::{HullError, Result};

/// Returns the log file path for a container.
#[must_use]
pub fn log_path(config: &HullConfig, name: &str) -> PathBuf {
    config.container_log(name)
}

/// Creates (or truncates) the log file at `path`, creating its directory.
///
/// # Errors
///
/// Returns an error if the directory or the file cannot be created.
pub fn create_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HullError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| HullError::io(path, e))?;
    tracing::debug!(path = %path.display(), "container log created");
    Ok(file)
}
