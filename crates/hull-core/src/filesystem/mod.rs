//! Filesystem plumbing for container root filesystems.
//!
//! Overlay mounts for the union root, bind mounts for volumes, and the
//! `pivot_root` dance performed by the container init.

pub mod mount;
pub mod overlayfs;
pub mod pivot_root;
