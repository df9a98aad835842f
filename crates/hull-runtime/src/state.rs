//! Persistent container records.
//!
//! Each container owns `<run>/containers/<name>/`, holding its
//! `config.json` record and, in detached mode, its log. There is no
//! daemon: every command reads the record it needs, mutates it and writes
//! it back.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use hull_common::config::HullConfig;
use hull_common::error::{HullError, Result};
use hull_common::types::{ContainerId, ContainerStatus};
use serde::{Deserialize, Serialize};

/// Format of [`ContainerRecord::created_time`].
pub const CREATED_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// On-disk record of one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    /// Host pid of the init process; `None` once stopped.
    pub pid: Option<u32>,
    /// Generated identifier.
    pub id: ContainerId,
    /// User-supplied name, or the id.
    pub name: String,
    /// The user command, space-joined.
    pub command: String,
    /// Local creation time in [`CREATED_TIME_FORMAT`].
    pub created_time: String,
    /// Lifecycle status.
    pub status: ContainerStatus,
    /// Raw `host:container` volume spec, or empty.
    #[serde(default)]
    pub volume: String,
    /// Image the root filesystem was built from.
    #[serde(default)]
    pub image: String,
    /// Network the container is attached to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Address allocated on [`Self::network`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<Ipv4Addr>,
    /// Published `host:container` port pairs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_mapping: Vec<String>,
}

impl ContainerRecord {
    /// Fresh record for a container that has just been started.
    #[must_use]
    pub fn running(id: ContainerId, name: &str, pid: u32, command: &[String]) -> Self {
        Self {
            pid: Some(pid),
            id,
            name: name.to_owned(),
            command: command.join(" "),
            created_time: chrono::Local::now().format(CREATED_TIME_FORMAT).to_string(),
            status: ContainerStatus::Running,
            volume: String::new(),
            image: String::new(),
            network: None,
            ip_address: None,
            port_mapping: Vec::new(),
        }
    }

    /// Marks the container stopped and forgets its pid.
    pub fn mark_stopped(&mut self) {
        self.status = ContainerStatus::Stopped;
        self.pid = None;
    }

    /// Marks a container whose process ended on its own.
    pub fn mark_exited(&mut self) {
        self.status = ContainerStatus::Exited;
        self.pid = None;
    }
}

/// Directory-per-container store of [`ContainerRecord`]s.
#[derive(Debug, Clone)]
pub struct StateStore {
    config: HullConfig,
}

impl StateStore {
    /// Store rooted at the containers directory of `config`.
    #[must_use]
    pub fn new(config: &HullConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Directory of the named container.
    #[must_use]
    pub fn container_dir(&self, name: &str) -> PathBuf {
        self.config.container_dir(name)
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.config.container_config(name)
    }

    /// Whether a record exists for `name`.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.record_path(name).is_file()
    }

    /// Writes `record`, replacing any previous version atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, record: &ContainerRecord) -> Result<()> {
        let dir = self.container_dir(&record.name);
        std::fs::create_dir_all(&dir).map_err(|e| HullError::io(&dir, e))?;
        let path = self.record_path(&record.name);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(record)?).map_err(|e| HullError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| HullError::io(&path, e))?;
        tracing::debug!(name = %record.name, status = %record.status, "record saved");
        Ok(())
    }

    /// Reads the record of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`HullError::NotFound`] when there is no such container, or
    /// an I/O or parse error.
    pub fn load(&self, name: &str) -> Result<ContainerRecord> {
        let path = self.record_path(name);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                HullError::NotFound {
                    kind: "container",
                    id: name.to_owned(),
                }
            } else {
                HullError::io(&path, e)
            }
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Deletes the container directory (record and log). Absent is fine.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn delete(&self, name: &str) -> Result<()> {
        remove_tree(&self.container_dir(name))?;
        tracing::debug!(name, "record deleted");
        Ok(())
    }
}

fn remove_tree(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(HullError::io(path, e)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(&HullConfig::with_root(dir.path()));
        (dir, store)
    }

    fn record(name: &str) -> ContainerRecord {
        ContainerRecord::running(
            ContainerId::new("0123456789"),
            name,
            4242,
            &["sh".into(), "-c".into(), "true".into()],
        )
    }

    #[test]
    fn record_uses_camel_case_keys() {
        let mut rec = record("web");
        rec.ip_address = Some(Ipv4Addr::new(10, 0, 0, 2));
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["createdTime"], rec.created_time.as_str());
        assert_eq!(json["ipAddress"], "10.0.0.2");
        assert_eq!(json["command"], "sh -c true");
        assert_eq!(json["status"], "running");
        assert!(json.get("portMapping").is_none());
    }

    #[test]
    fn stopped_record_has_null_pid() {
        let mut rec = record("web");
        rec.mark_stopped();
        let json = serde_json::to_value(&rec).unwrap();
        assert!(json["pid"].is_null());
        assert_eq!(json["status"], "stopped");
    }

    #[test]
    fn created_time_has_expected_shape() {
        let rec = record("web");
        assert!(chrono::NaiveDateTime::parse_from_str(&rec.created_time, CREATED_TIME_FORMAT).is_ok());
    }

    #[test]
    fn save_then_load() {
        let (_dir, store) = store();
        let rec = record("web");
        store.save(&rec).unwrap();
        assert!(store.exists("web"));
        assert_eq!(store.load("web").unwrap(), rec);
    }

    #[test]
    fn load_missing_is_not_found() {
        let (_dir, store) = store();
        let err = store.load("ghost").unwrap_err();
        assert!(matches!(err, HullError::NotFound { kind: "container", .. }));
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, store) = store();
        store.save(&record("web")).unwrap();
        store.delete("web").unwrap();
        store.delete("web").unwrap();
        assert!(!store.exists("web"));
    }
}
