//! Advisory file locks serializing access to shared on-disk state.
//!
//! The allocator table and the network registry are read, modified and
//! rewritten as a whole; concurrent `hull` invocations hold a [`FileLock`]
//! across each load-modify-dump cycle.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};

use crate::error::{HullError, Result};

/// An exclusive `flock(2)` held until the value is dropped.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    _lock: Flock<File>,
}

impl FileLock {
    /// Blocks until an exclusive lock on `path` is acquired.
    ///
    /// The lock file and its parent directory are created when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be opened or locked.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HullError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| HullError::io(path, e))?;
        let lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| HullError::syscall(format!("flock {}", path.display()), errno))?;
        tracing::trace!(path = %path.display(), "lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            _lock: lock,
        })
    }

    /// Returns the path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
