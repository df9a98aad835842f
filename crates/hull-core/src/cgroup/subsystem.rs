//! The subsystem abstraction shared by every cgroup controller.
//!
//! A subsystem maps a logical group path such as `hull/0123456789` to a
//! directory inside its own hierarchy. The hierarchy is discovered from the
//! mount table on every call: a legacy `cgroup` mount carrying the
//! subsystem's name as a super option wins, otherwise the unified
//! `cgroup2` mount is used.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use hull_common::error::{HullError, Result};
use hull_common::types::ResourceConfig;

use crate::mountinfo::MountTable;

/// Where a subsystem's controller files live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hierarchy {
    /// A per-controller cgroup v1 hierarchy.
    Legacy(PathBuf),
    /// The cgroup v2 unified hierarchy.
    Unified(PathBuf),
}

impl Hierarchy {
    /// Locates the hierarchy for `subsystem` in `mounts`.
    ///
    /// # Errors
    ///
    /// Returns [`HullError::NotFound`] if neither a matching legacy mount nor
    /// a unified mount exists, or an I/O error if the table cannot be read.
    pub fn discover(mounts: &MountTable, subsystem: &str) -> Result<Self> {
        let entries = mounts.entries()?;
        if let Some(m) = entries
            .iter()
            .find(|m| m.fs_type == "cgroup" && m.has_option(subsystem))
        {
            return Ok(Self::Legacy(m.mount_point.clone()));
        }
        entries
            .iter()
            .find(|m| m.fs_type == "cgroup2")
            .map(|m| Self::Unified(m.mount_point.clone()))
            .ok_or_else(|| HullError::NotFound {
                kind: "cgroup hierarchy",
                id: subsystem.to_owned(),
            })
    }

    /// Returns the mount point of this hierarchy.
    #[must_use]
    pub fn root(&self) -> &Path {
        match self {
            Self::Legacy(root) | Self::Unified(root) => root,
        }
    }

    /// Returns whether this is the unified hierarchy.
    #[must_use]
    pub const fn is_unified(&self) -> bool {
        matches!(self, Self::Unified(_))
    }
}

/// A resolved cgroup directory inside a hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupDir {
    /// Absolute path of the cgroup directory.
    pub path: PathBuf,
    /// Hierarchy the directory belongs to.
    pub hierarchy: Hierarchy,
}

impl CgroupDir {
    /// File listing the member processes of this cgroup.
    #[must_use]
    pub fn procs_file(&self) -> PathBuf {
        if self.hierarchy.is_unified() {
            self.path.join("cgroup.procs")
        } else {
            self.path.join("tasks")
        }
    }

    /// Writes `value` to the control file `name` inside this cgroup.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn write(&self, name: &str, value: &str) -> Result<()> {
        let file = self.path.join(name);
        std::fs::write(&file, value).map_err(|e| HullError::io(&file, e))?;
        tracing::debug!(file = %file.display(), value, "cgroup control file written");
        Ok(())
    }

    /// Reads the control file `name`, trimmed.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn read(&self, name: &str) -> Result<String> {
        let file = self.path.join(name);
        std::fs::read_to_string(&file)
            .map(|s| s.trim().to_owned())
            .map_err(|e| HullError::io(&file, e))
    }
}

/// A cgroup controller that can host a process and enforce limits.
pub trait Subsystem: Send + Sync {
    /// Controller name as it appears in the mount options.
    fn name(&self) -> &'static str;

    /// Writes every limit of `res` this controller cares about.
    ///
    /// Empty fields must not touch any file.
    ///
    /// # Errors
    ///
    /// Returns an error if a control file write fails.
    fn write_limits(&self, dir: &CgroupDir, res: &ResourceConfig) -> Result<()>;

    /// Hook run once for every cgroup directory this subsystem creates,
    /// parents first.
    ///
    /// # Errors
    ///
    /// Returns an error if the new cgroup cannot be prepared.
    fn initialize(&self, _dir: &CgroupDir) -> Result<()> {
        Ok(())
    }

    /// Resolves `group` inside this controller's hierarchy.
    ///
    /// With `create`, missing directories are created from the top down and
    /// each one is initialized. On the unified hierarchy the controller is
    /// also enabled in every ancestor's `cgroup.subtree_control`, even when
    /// the group already exists, since other controllers share it.
    ///
    /// # Errors
    ///
    /// Returns an error if the hierarchy cannot be found or the directory
    /// cannot be created.
    fn cgroup_dir(&self, mounts: &MountTable, group: &str, create: bool) -> Result<CgroupDir> {
        let hierarchy = Hierarchy::discover(mounts, self.name())?;
        let path = hierarchy.root().join(group.trim_start_matches('/'));
        let dir = CgroupDir { path, hierarchy };
        if create {
            for created in create_missing(dir.hierarchy.root(), &dir.path)? {
                tracing::debug!(subsystem = self.name(), path = %created.display(), "cgroup created");
                self.initialize(&CgroupDir {
                    path: created,
                    hierarchy: dir.hierarchy.clone(),
                })?;
            }
            if dir.hierarchy.is_unified() {
                enable_controller(dir.hierarchy.root(), &dir.path, self.name());
            }
        }
        Ok(dir)
    }

    /// Adds `pid` to `group`, creating the cgroup if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the cgroup cannot be resolved or the membership
    /// file cannot be written.
    fn apply(&self, mounts: &MountTable, group: &str, pid: u32) -> Result<()> {
        let dir = self.cgroup_dir(mounts, group, true)?;
        let procs = dir.procs_file();
        std::fs::write(&procs, pid.to_string()).map_err(|e| HullError::io(&procs, e))?;
        tracing::debug!(subsystem = self.name(), pid, "process added to cgroup");
        Ok(())
    }

    /// Writes the limits of `res` for `group`, creating the cgroup if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the cgroup cannot be resolved or written.
    fn set(&self, mounts: &MountTable, group: &str, res: &ResourceConfig) -> Result<()> {
        let dir = self.cgroup_dir(mounts, group, true)?;
        self.write_limits(&dir, res)
    }

    /// Deletes the cgroup directory of `group`. An absent cgroup is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed,
    /// typically because member processes remain.
    fn remove(&self, mounts: &MountTable, group: &str) -> Result<()> {
        let dir = self.cgroup_dir(mounts, group, false)?;
        match std::fs::remove_dir(&dir.path) {
            Ok(()) => {
                tracing::debug!(subsystem = self.name(), path = %dir.path.display(), "cgroup removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HullError::io(&dir.path, e)),
        }
    }
}

/// Creates every missing directory between `root` and `target`, returning
/// the new ones in creation order.
fn create_missing(root: &Path, target: &Path) -> Result<Vec<PathBuf>> {
    let relative = target.strip_prefix(root).map_err(|_| HullError::InvalidInput {
        message: format!("{} is outside {}", target.display(), root.display()),
    })?;
    let mut created = Vec::new();
    let mut current = root.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match std::fs::create_dir(&current) {
            Ok(()) => created.push(current.clone()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(HullError::io(&current, e)),
        }
    }
    Ok(created)
}

/// Enables `controller` in `root` and every ancestor of `target` below it.
///
/// The write appends, so controllers enabled earlier stay enabled.
/// Failures are only logged: the controller may not be delegated, and the
/// control-file write that follows reports the real problem.
fn enable_controller(root: &Path, target: &Path, controller: &str) {
    let Ok(relative) = target.strip_prefix(root) else {
        return;
    };
    let mut current = root.to_path_buf();
    for component in relative.components() {
        let control = current.join("cgroup.subtree_control");
        let written = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&control)
            .and_then(|mut f| f.write_all(format!("+{controller}\n").as_bytes()));
        if let Err(e) = written {
            tracing::debug!(file = %control.display(), error = %e, "could not enable controller");
        }
        current.push(component);
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{legacy_table, unified_table};
    use super::*;

    #[test]
    fn discover_prefers_legacy_mount() {
        let dir = tempfile::tempdir().unwrap();
        let table = legacy_table(dir.path(), &["memory"]);
        let h = Hierarchy::discover(&table, "memory").unwrap();
        assert_eq!(h, Hierarchy::Legacy(dir.path().join("memory")));
    }

    #[test]
    fn discover_falls_back_to_unified() {
        let dir = tempfile::tempdir().unwrap();
        let (table, mount) = unified_table(dir.path());
        let h = Hierarchy::discover(&table, "cpuset").unwrap();
        assert_eq!(h, Hierarchy::Unified(mount));
    }

    #[test]
    fn discover_without_any_cgroup_mount_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("mountinfo");
        std::fs::write(&table, "25 30 0:23 / /sys rw - sysfs sysfs rw\n").unwrap();
        let err = Hierarchy::discover(&MountTable::from_file(table), "memory").unwrap_err();
        assert!(matches!(err, HullError::NotFound { .. }));
    }

    #[test]
    fn procs_file_depends_on_hierarchy() {
        let legacy = CgroupDir {
            path: PathBuf::from("/cg/memory/x"),
            hierarchy: Hierarchy::Legacy(PathBuf::from("/cg/memory")),
        };
        let unified = CgroupDir {
            path: PathBuf::from("/cg/x"),
            hierarchy: Hierarchy::Unified(PathBuf::from("/cg")),
        };
        assert_eq!(legacy.procs_file(), PathBuf::from("/cg/memory/x/tasks"));
        assert_eq!(unified.procs_file(), PathBuf::from("/cg/x/cgroup.procs"));
    }

    #[test]
    fn missing_parents_are_created_top_down() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cg");
        std::fs::create_dir_all(root.join("hull")).unwrap();
        let created = create_missing(&root, &root.join("hull/a/b")).unwrap();
        assert_eq!(created, vec![root.join("hull/a"), root.join("hull/a/b")]);
        assert!(create_missing(&root, &root.join("hull/a/b")).unwrap().is_empty());
    }
}
