//! Control group resource management.
//!
//! A container's cgroup lives at `hull/<container-id>` inside every
//! controller's hierarchy. Controllers are driven in a fixed order
//! (cpuset, memory, cpu); a failure in one does not stop the others and
//! all failures are reported together.

pub mod cpu;
pub mod cpuset;
pub mod memory;
pub mod subsystem;

use hull_common::constants::CGROUP_PARENT;
use hull_common::error::{HullError, Result};
use hull_common::types::ResourceConfig;

use crate::mountinfo::MountTable;

use self::cpu::CpuSubsystem;
use self::cpuset::CpusetSubsystem;
use self::memory::MemorySubsystem;
use self::subsystem::Subsystem;

/// Handle on one container's cgroup across all controllers.
pub struct CgroupManager {
    group: String,
    mounts: MountTable,
    subsystems: Vec<Box<dyn Subsystem>>,
}

impl std::fmt::Debug for CgroupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.subsystems.iter().map(|s| s.name()).collect();
        f.debug_struct("CgroupManager")
            .field("group", &self.group)
            .field("subsystems", &names)
            .finish_non_exhaustive()
    }
}

impl CgroupManager {
    /// Manager for the container with `container_id`, using the live mount table.
    #[must_use]
    pub fn new(container_id: &str) -> Self {
        Self::with_mounts(container_id, MountTable::current())
    }

    /// Manager reading hierarchies from an explicit mount table.
    #[must_use]
    pub fn with_mounts(container_id: &str, mounts: MountTable) -> Self {
        Self {
            group: format!("{CGROUP_PARENT}/{container_id}"),
            mounts,
            subsystems: vec![
                Box::new(CpusetSubsystem),
                Box::new(MemorySubsystem),
                Box::new(CpuSubsystem),
            ],
        }
    }

    /// Group path relative to each hierarchy root.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Writes the requested limits into every controller.
    ///
    /// # Errors
    ///
    /// Returns every controller failure, aggregated.
    pub fn set(&self, res: &ResourceConfig) -> Result<()> {
        self.each(|s| s.set(&self.mounts, &self.group, res))?;
        tracing::info!(group = %self.group, "cgroup limits set");
        Ok(())
    }

    /// Moves `pid` into the group in every controller.
    ///
    /// # Errors
    ///
    /// Returns every controller failure, aggregated.
    pub fn apply(&self, pid: u32) -> Result<()> {
        self.each(|s| s.apply(&self.mounts, &self.group, pid))?;
        tracing::info!(group = %self.group, pid, "process placed in cgroup");
        Ok(())
    }

    /// Removes the group from every controller. Missing groups are ignored.
    ///
    /// # Errors
    ///
    /// Returns every controller failure, aggregated.
    pub fn destroy(&self) -> Result<()> {
        self.each(|s| s.remove(&self.mounts, &self.group))?;
        tracing::info!(group = %self.group, "cgroup destroyed");
        Ok(())
    }

    fn each(&self, mut op: impl FnMut(&dyn Subsystem) -> Result<()>) -> Result<()> {
        let mut errors = Vec::new();
        for subsystem in &self.subsystems {
            if let Err(e) = op(subsystem.as_ref()) {
                tracing::warn!(subsystem = subsystem.name(), error = %e, "cgroup operation failed");
                errors.push(e);
            }
        }
        HullError::collect(errors)
    }
}
