//! # hull-core
//!
//! Low-level Linux isolation primitives for the hull runtime.
//!
//! This crate provides safe abstractions over:
//! - **Namespaces**: clone flags, user ID mapping and network namespace entry.
//! - **Cgroups**: cpuset, memory and cpu subsystems on legacy or unified hierarchies.
//! - **Filesystem**: `OverlayFS` union mounts, bind mounts and `pivot_root`.
//! - **Mount table**: parsing of `/proc/self/mountinfo`.
//!
//! Every system call goes through `nix` and reports failures as
//! [`hull_common::error::HullError`].

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod filesystem;
pub mod mountinfo;
pub mod namespace;
