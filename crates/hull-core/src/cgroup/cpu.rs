//! CPU bandwidth controller.
//!
//! Shares use the v1 scale (2..=262144, default 1024). On the unified
//! hierarchy they are converted to `cpu.weight` (1..=10000).

use hull_common::error::{HullError, Result};
use hull_common::types::ResourceConfig;

use super::subsystem::{CgroupDir, Subsystem};

/// The `cpu` controller.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuSubsystem;

/// Converts v1 `cpu.shares` to a v2 `cpu.weight`.
#[must_use]
pub fn shares_to_weight(shares: u64) -> u64 {
    let shares = shares.clamp(2, 262_144);
    1 + ((shares - 2) * 9999) / 262_142
}

impl Subsystem for CpuSubsystem {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn write_limits(&self, dir: &CgroupDir, res: &ResourceConfig) -> Result<()> {
        let Some(shares) = res.cpu_share() else {
            return Ok(());
        };
        if dir.hierarchy.is_unified() {
            let parsed: u64 = shares.parse().map_err(|_| HullError::InvalidInput {
                message: format!("cpu share must be an integer, got {shares:?}"),
            })?;
            dir.write("cpu.weight", &shares_to_weight(parsed).to_string())
        } else {
            dir.write("cpu.shares", shares)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::subsystem::test_support::{legacy_table, unified_table};
    use super::*;

    #[test]
    fn weight_conversion_covers_bounds() {
        assert_eq!(shares_to_weight(2), 1);
        assert_eq!(shares_to_weight(262_144), 10_000);
        assert_eq!(shares_to_weight(1024), 39);
        assert_eq!(shares_to_weight(0), 1);
    }

    #[test]
    fn legacy_shares_written_verbatim() {
        let root = tempfile::tempdir().unwrap();
        let table = legacy_table(root.path(), &["cpu"]);
        let res = ResourceConfig {
            cpu_share: "512".into(),
            ..ResourceConfig::default()
        };
        CpuSubsystem.set(&table, "hull/c1", &res).unwrap();
        let written =
            std::fs::read_to_string(root.path().join("cpu/hull/c1/cpu.shares")).unwrap();
        assert_eq!(written, "512");
    }

    #[test]
    fn unified_rejects_non_numeric_shares() {
        let root = tempfile::tempdir().unwrap();
        let (table, _) = unified_table(root.path());
        let res = ResourceConfig {
            cpu_share: "lots".into(),
            ..ResourceConfig::default()
        };
        let err = CpuSubsystem.set(&table, "hull/c1", &res).unwrap_err();
        assert!(matches!(err, HullError::InvalidInput { .. }));
    }
}
