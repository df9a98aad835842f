//! Linux namespace handling for container isolation.
//!
//! The container init is created with `clone(2)` inside a fresh set of
//! namespaces; this module decides which ones and provides the helpers
//! that run once the child exists (identity mapping, network namespace
//! entry).

pub mod network;
pub mod user;

use nix::sched::CloneFlags;

/// Which namespaces a new container gets.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceConfig {
    /// Isolate the hostname.
    pub uts: bool,
    /// Isolate System V IPC and POSIX message queues.
    pub ipc: bool,
    /// Give the container its own PID 1.
    pub pid: bool,
    /// Give the container its own mount table.
    pub mount: bool,
    /// Map the container's root to the invoking user.
    pub user: bool,
    /// Give the container its own network stack.
    pub network: bool,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            uts: true,
            ipc: true,
            pid: true,
            mount: true,
            user: true,
            network: true,
        }
    }
}

impl NamespaceConfig {
    /// Translates the selection into `clone(2)` flags.
    #[must_use]
    pub fn clone_flags(&self) -> CloneFlags {
        let mut flags = CloneFlags::empty();
        for (enabled, flag) in [
            (self.uts, CloneFlags::CLONE_NEWUTS),
            (self.ipc, CloneFlags::CLONE_NEWIPC),
            (self.pid, CloneFlags::CLONE_NEWPID),
            (self.mount, CloneFlags::CLONE_NEWNS),
            (self.user, CloneFlags::CLONE_NEWUSER),
            (self.network, CloneFlags::CLONE_NEWNET),
        ] {
            if enabled {
                flags |= flag;
            }
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_isolates_everything() {
        let flags = NamespaceConfig::default().clone_flags();
        assert!(flags.contains(CloneFlags::CLONE_NEWUSER | CloneFlags::CLONE_NEWNET));
        assert!(flags.contains(CloneFlags::CLONE_NEWPID | CloneFlags::CLONE_NEWNS));
        assert!(flags.contains(CloneFlags::CLONE_NEWUTS | CloneFlags::CLONE_NEWIPC));
    }

    #[test]
    fn disabled_namespaces_are_left_out() {
        let cfg = NamespaceConfig {
            user: false,
            network: false,
            ..NamespaceConfig::default()
        };
        let flags = cfg.clone_flags();
        assert!(!flags.contains(CloneFlags::CLONE_NEWUSER));
        assert!(!flags.contains(CloneFlags::CLONE_NEWNET));
        assert!(flags.contains(CloneFlags::CLONE_NEWPID));
    }
}
