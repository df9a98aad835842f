//! Memory controller.
//!
//! The limit is passed through in the kernel's own syntax (`100m`, `1g`,
//! plain bytes); the kernel does the parsing.

use hull_common::error::Result;
use hull_common::types::ResourceConfig;

use super::subsystem::{CgroupDir, Subsystem};

/// The `memory` controller.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemorySubsystem;

impl MemorySubsystem {
    /// Control file carrying the hard limit in `dir`'s hierarchy.
    #[must_use]
    pub fn limit_file(dir: &CgroupDir) -> &'static str {
        if dir.hierarchy.is_unified() {
            "memory.max"
        } else {
            "memory.limit_in_bytes"
        }
    }
}

impl Subsystem for MemorySubsystem {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn write_limits(&self, dir: &CgroupDir, res: &ResourceConfig) -> Result<()> {
        if let Some(limit) = res.memory_limit() {
            dir.write(Self::limit_file(dir), limit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::subsystem::test_support::{legacy_table, unified_table};
    use super::*;

    #[test]
    fn empty_limit_writes_nothing() {
        let root = tempfile::tempdir().unwrap();
        let table = legacy_table(root.path(), &["memory"]);
        MemorySubsystem
            .set(&table, "hull/c1", &ResourceConfig::default())
            .unwrap();
        let cg = root.path().join("memory/hull/c1");
        assert!(cg.is_dir());
        assert!(!cg.join("memory.limit_in_bytes").exists());
    }

    #[test]
    fn legacy_limit_is_written_verbatim() {
        let root = tempfile::tempdir().unwrap();
        let table = legacy_table(root.path(), &["memory"]);
        let res = ResourceConfig {
            memory_limit: "100m".into(),
            ..ResourceConfig::default()
        };
        MemorySubsystem.set(&table, "hull/c1", &res).unwrap();
        let written =
            std::fs::read_to_string(root.path().join("memory/hull/c1/memory.limit_in_bytes"))
                .unwrap();
        assert_eq!(written, "100m");
    }

    #[test]
    fn unified_limit_goes_to_memory_max() {
        let root = tempfile::tempdir().unwrap();
        let (table, mount) = unified_table(root.path());
        let res = ResourceConfig {
            memory_limit: "64m".into(),
            ..ResourceConfig::default()
        };
        MemorySubsystem.set(&table, "hull/c2", &res).unwrap();
        let written = std::fs::read_to_string(mount.join("hull/c2/memory.max")).unwrap();
        assert_eq!(written, "64m");
    }
}
