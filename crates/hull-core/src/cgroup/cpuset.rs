//! CPU pinning controller.

use hull_common::error::Result;
use hull_common::types::ResourceConfig;

use super::subsystem::{CgroupDir, Subsystem};

/// The `cpuset` controller.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpusetSubsystem;

impl Subsystem for CpusetSubsystem {
    fn name(&self) -> &'static str {
        "cpuset"
    }

    fn write_limits(&self, dir: &CgroupDir, res: &ResourceConfig) -> Result<()> {
        if let Some(cpus) = res.cpu_set() {
            dir.write("cpuset.cpus", cpus)?;
        }
        Ok(())
    }

    /// A fresh v1 cpuset starts with empty `cpus` and `mems`, which makes
    /// any task write fail. Copy both from the parent, which has already
    /// been initialized when it was created in the same call.
    fn initialize(&self, dir: &CgroupDir) -> Result<()> {
        if dir.hierarchy.is_unified() {
            return Ok(());
        }
        let Some(parent) = dir.path.parent() else {
            return Ok(());
        };
        let parent = CgroupDir {
            path: parent.to_path_buf(),
            hierarchy: dir.hierarchy.clone(),
        };
        for file in ["cpuset.cpus", "cpuset.mems"] {
            let current = dir.read(file).unwrap_or_default();
            if !current.is_empty() {
                continue;
            }
            if let Ok(inherited) = parent.read(file) {
                if !inherited.is_empty() {
                    dir.write(file, &inherited)?;
                }
            }
        }
        Ok(())
    }
}
