//! `OverlayFS` union mounts.
//!
//! A container root is a single read-only lower layer (the unpacked image)
//! under a per-container writable upper layer.

use std::path::{Path, PathBuf};

use hull_common::error::{HullError, Result};
use nix::mount::{mount, MsFlags};

/// Configuration for an `OverlayFS` mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Read-only lower layers, topmost first.
    pub lower_dirs: Vec<PathBuf>,
    /// Writable upper layer directory.
    pub upper_dir: PathBuf,
    /// Scratch directory required by `OverlayFS`; same filesystem as `upper_dir`.
    pub work_dir: PathBuf,
    /// Where the union is mounted.
    pub merged_dir: PathBuf,
}

impl OverlayConfig {
    /// Renders the `lowerdir=...,upperdir=...,workdir=...` option string.
    #[must_use]
    pub fn options(&self) -> String {
        let lowers = self
            .lower_dirs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        format!(
            "lowerdir={lowers},upperdir={},workdir={}",
            self.upper_dir.display(),
            self.work_dir.display()
        )
    }
}

/// Mounts the overlay described by `config`.
///
/// The upper, work and merged directories are created when missing.
///
/// # Errors
///
/// Returns an error if directory creation or the `mount(2)` call fails.
pub fn mount_overlay(config: &OverlayConfig) -> Result<()> {
    for dir in [&config.upper_dir, &config.work_dir, &config.merged_dir] {
        create_dir(dir)?;
    }
    let opts = config.options();
    mount(
        Some("overlay"),
        &config.merged_dir,
        Some("overlay"),
        MsFlags::empty(),
        Some(opts.as_str()),
    )
    .map_err(|e| HullError::syscall(format!("mount overlay on {}", config.merged_dir.display()), e))?;
    tracing::info!(merged = %config.merged_dir.display(), "overlayfs mounted");
    Ok(())
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| HullError::io(dir, e))
}
