//! Entering a container's network namespace from the host.
//!
//! Namespace membership is per thread. [`with_netns`] runs a closure on a
//! dedicated scoped thread that joins the target namespace, so the calling
//! thread never leaves the host namespace even if the closure panics.

use std::fs::File;
use std::path::{Path, PathBuf};

use hull_common::error::{HullError, Result};
use nix::sched::{setns, CloneFlags};

/// Path of the network namespace handle of process `pid`.
#[must_use]
pub fn netns_path(pid: u32) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/ns/net"))
}

/// Opens a network namespace handle.
///
/// # Errors
///
/// Returns an error if the handle cannot be opened.
pub fn open_netns(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| HullError::io(path, e))
}

/// Moves the current thread into a network namespace until dropped.
#[derive(Debug)]
pub struct NetnsGuard {
    original: File,
}

impl NetnsGuard {
    /// Switches the current thread into the namespace `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the current namespace cannot be saved or
    /// `setns(2)` fails.
    pub fn enter(target: &File) -> Result<Self> {
        let original = open_netns(Path::new("/proc/thread-self/ns/net"))?;
        setns(target, CloneFlags::CLONE_NEWNET)
            .map_err(|e| HullError::syscall("setns into container netns", e))?;
        Ok(Self { original })
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        if let Err(e) = setns(&self.original, CloneFlags::CLONE_NEWNET) {
            tracing::error!(error = %e, "failed to restore original network namespace");
        }
    }
}

/// Runs `f` inside the network namespace at `ns_path`.
///
/// Sockets opened by `f` belong to the target namespace; handles created
/// before the call keep pointing at the host namespace.
///
/// # Errors
///
/// Returns an error if the namespace cannot be entered, if `f` fails, or
/// if the worker thread panics.
pub fn with_netns<T, F>(ns_path: &Path, f: F) -> Result<T>
where
    T: Send,
    F: FnOnce() -> Result<T> + Send,
{
    let target = open_netns(ns_path)?;
    std::thread::scope(|scope| {
        scope
            .spawn(|| {
                let _guard = NetnsGuard::enter(&target)?;
                f()
            })
            .join()
            .map_err(|_| HullError::InvalidState {
                message: format!("worker in netns {} panicked", ns_path.display()),
            })?
    })
}
