//! Mount helpers shared by the workspace manager and the container init.

use std::path::Path;

use hull_common::error::{HullError, Result};
use nix::mount::{mount, umount2, MntFlags, MsFlags};

use crate::mountinfo::MountTable;

/// Bind-mounts `source` onto `target`.
///
/// # Errors
///
/// Returns an error if the `mount(2)` call fails.
pub fn bind_mount(source: &Path, target: &Path) -> Result<()> {
    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| {
        HullError::syscall(
            format!("bind {} to {}", source.display(), target.display()),
            e,
        )
    })?;
    tracing::debug!(source = %source.display(), target = %target.display(), "bind mount created");
    Ok(())
}

/// Lazily detaches whatever is mounted at `target`.
///
/// Returns `false` without touching anything when `target` is not a mount
/// point in `mounts`.
///
/// # Errors
///
/// Returns an error if the mount table cannot be read or `umount2(2)` fails.
pub fn unmount_if_mounted(mounts: &MountTable, target: &Path) -> Result<bool> {
    if !mounts.is_mount_point(target)? {
        return Ok(false);
    }
    umount2(target, MntFlags::MNT_DETACH)
        .map_err(|e| HullError::syscall(format!("umount {}", target.display()), e))?;
    tracing::debug!(target = %target.display(), "unmounted");
    Ok(true)
}

/// Marks every mount in the current namespace private and recursive, so
/// nothing done inside the container propagates back to the host.
///
/// # Errors
///
/// Returns an error if the `mount(2)` call fails.
pub fn make_mounts_private() -> Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| HullError::syscall("make / private", e))
}

/// Mounts a fresh `proc` at `/proc`.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the mount fails.
pub fn mount_proc() -> Result<()> {
    let target = Path::new("/proc");
    std::fs::create_dir_all(target).map_err(|e| HullError::io(target, e))?;
    let flags = MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV;
    mount(Some("proc"), target, Some("proc"), flags, None::<&str>)
        .map_err(|e| HullError::syscall("mount /proc", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmount_skips_paths_that_are_not_mounted() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("mountinfo");
        std::fs::write(&table, "25 30 0:23 / /sys rw - sysfs sysfs rw\n").unwrap();
        let mounted = unmount_if_mounted(&MountTable::from_file(table), dir.path()).unwrap();
        assert!(!mounted);
    }
}
