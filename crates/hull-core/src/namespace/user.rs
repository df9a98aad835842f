//! User namespace identity mapping.
//!
//! The container's root (uid/gid 0) is mapped onto the invoking user with
//! a range of one, so nothing inside the container holds real host
//! privileges beyond the caller's own.

use std::path::PathBuf;

use hull_common::error::{HullError, Result};

/// A single-entry id map: `inside` in the namespace is `outside` on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMap {
    /// Id inside the namespace.
    pub inside: u32,
    /// Id on the host.
    pub outside: u32,
    /// Number of consecutive ids mapped.
    pub count: u32,
}

impl IdMap {
    /// Maps container root onto `host_id`.
    #[must_use]
    pub const fn root_to(host_id: u32) -> Self {
        Self {
            inside: 0,
            outside: host_id,
            count: 1,
        }
    }

    /// Line in the format expected by `uid_map` and `gid_map`.
    #[must_use]
    pub fn render(&self) -> String {
        format!("{} {} {}", self.inside, self.outside, self.count)
    }
}

/// Writes the uid and gid maps of process `pid`.
///
/// `setgroups` is denied first, which unprivileged callers must do before
/// writing a gid map.
///
/// # Errors
///
/// Returns an error if any of the `/proc/<pid>` files cannot be written.
pub fn write_uid_gid_map(pid: u32, uid: IdMap, gid: IdMap) -> Result<()> {
    let proc_dir = PathBuf::from(format!("/proc/{pid}"));

    let setgroups = proc_dir.join("setgroups");
    if setgroups.exists() {
        std::fs::write(&setgroups, "deny").map_err(|e| HullError::io(&setgroups, e))?;
    }
    let uid_map = proc_dir.join("uid_map");
    std::fs::write(&uid_map, uid.render()).map_err(|e| HullError::io(&uid_map, e))?;
    let gid_map = proc_dir.join("gid_map");
    std::fs::write(&gid_map, gid.render()).map_err(|e| HullError::io(&gid_map, e))?;

    tracing::debug!(pid, uid = %uid.render(), gid = %gid.render(), "wrote id maps");
    Ok(())
}
