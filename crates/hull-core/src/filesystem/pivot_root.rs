//! Root filesystem switching via `pivot_root(2)`.
//!
//! Unlike `chroot`, the old root is detached entirely so the container
//! cannot walk back out of it.

use std::path::Path;

use hull_common::error::{HullError, Result};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::unistd::chdir;

const OLD_ROOT: &str = ".pivot_root";

/// Makes `new_root` the root of the calling mount namespace.
///
/// `new_root` is first bind-mounted onto itself because `pivot_root(2)`
/// requires the new root to be a mount point. The old root is then
/// detached and its placeholder directory removed.
///
/// # Errors
///
/// Returns an error if any of the mount, pivot or cleanup steps fails.
pub fn pivot_root(new_root: &Path) -> Result<()> {
    mount(
        Some(new_root),
        new_root,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| HullError::syscall(format!("bind {} onto itself", new_root.display()), e))?;

    let put_old = new_root.join(OLD_ROOT);
    std::fs::create_dir_all(&put_old).map_err(|e| HullError::io(&put_old, e))?;
    nix::unistd::pivot_root(new_root, &put_old)
        .map_err(|e| HullError::syscall(format!("pivot_root to {}", new_root.display()), e))?;
    chdir("/").map_err(|e| HullError::syscall("chdir /", e))?;

    let old = Path::new("/").join(OLD_ROOT);
    umount2(&old, MntFlags::MNT_DETACH).map_err(|e| HullError::syscall("umount old root", e))?;
    std::fs::remove_dir(&old).map_err(|e| HullError::io(&old, e))?;
    tracing::debug!(new_root = %new_root.display(), "root switched");
    Ok(())
}
