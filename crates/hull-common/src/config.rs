//! Global configuration model for the hull runtime.
//!
//! All on-disk locations are derived from two roots: the volatile run
//! directory (records, logs, network registry, allocator table) and the
//! persistent data directory (image archives and filesystem layers).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{
    CONFIG_FILE_NAME, DEFAULT_DATA_DIR, DEFAULT_RUN_DIR, IPAM_FILE_NAME, LOG_FILE_NAME,
};
use crate::error::{HullError, Result};

/// Root configuration for the hull runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HullConfig {
    /// Base directory for runtime state.
    pub run_dir: PathBuf,
    /// Base directory for images and container layers.
    pub data_dir: PathBuf,
}

impl Default for HullConfig {
    fn default() -> Self {
        Self {
            run_dir: PathBuf::from(DEFAULT_RUN_DIR),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

impl HullConfig {
    /// Places both roots under a single directory (`<root>/run`, `<root>/data`).
    #[must_use]
    pub fn with_root(root: &Path) -> Self {
        Self {
            run_dir: root.join("run"),
            data_dir: root.join("data"),
        }
    }

    /// Checks that both roots are absolute and distinct.
    ///
    /// # Errors
    ///
    /// Returns [`HullError::Config`] naming the offending root.
    pub fn validate(&self) -> Result<()> {
        for (key, dir) in [("run_dir", &self.run_dir), ("data_dir", &self.data_dir)] {
            if !dir.is_absolute() {
                return Err(HullError::Config {
                    message: format!("{key} must be absolute, got {}", dir.display()),
                });
            }
        }
        if self.run_dir == self.data_dir {
            return Err(HullError::Config {
                message: format!("run_dir and data_dir are both {}", self.run_dir.display()),
            });
        }
        Ok(())
    }

    /// Directory holding one sub-directory per container.
    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.run_dir.join("containers")
    }

    /// Directory holding the record and log of the named container.
    #[must_use]
    pub fn container_dir(&self, name: &str) -> PathBuf {
        self.containers_dir().join(name)
    }

    /// Path of the named container's record.
    #[must_use]
    pub fn container_config(&self, name: &str) -> PathBuf {
        self.container_dir(name).join(CONFIG_FILE_NAME)
    }

    /// Path of the named container's detached-mode log.
    #[must_use]
    pub fn container_log(&self, name: &str) -> PathBuf {
        self.container_dir(name).join(LOG_FILE_NAME)
    }

    /// Directory holding one descriptor file per network.
    #[must_use]
    pub fn network_dir(&self) -> PathBuf {
        self.run_dir.join("network").join("network")
    }

    /// Path of the IP allocation table.
    #[must_use]
    pub fn ipam_file(&self) -> PathBuf {
        self.run_dir.join("network").join("ipam").join(IPAM_FILE_NAME)
    }

    /// Directory holding image archives and their unpacked base layers.
    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }

    /// Directory holding per-container writable layers.
    #[must_use]
    pub fn layers_dir(&self) -> PathBuf {
        self.data_dir.join("layers")
    }

    /// Directory holding per-container overlay work directories.
    #[must_use]
    pub fn work_dir(&self) -> PathBuf {
        self.data_dir.join("work")
    }

    /// Directory holding per-container union mount points.
    #[must_use]
    pub fn mnt_dir(&self) -> PathBuf {
        self.data_dir.join("mnt")
    }
}
