//! Integration tests for workspaces, container records and the engine's
//! stop/remove/exec paths.
//!
//! Tests that mount filesystems return early unless run as root.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use hull_common::config::HullConfig;
use hull_common::error::HullError;
use hull_common::types::{ContainerId, ContainerStatus};
use hull_core::mountinfo::MountTable;
use hull_network::{Ipam, KernelWiring, NetworkManager};
use hull_runtime::engine::{Engine, RunOptions};
use hull_runtime::process::ProcessLauncher;
use hull_runtime::state::{ContainerRecord, StateStore};
use hull_runtime::workspace::WorkspaceManager;

struct Fixture {
    _dir: tempfile::TempDir,
    config: HullConfig,
    mounts: MountTable,
}

impl Fixture {
    /// Layout under a temp dir with a fake mount table that only knows a
    /// unified cgroup hierarchy inside the same temp dir.
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = HullConfig::with_root(dir.path());
        let cgroup_root = dir.path().join("cgroup");
        std::fs::create_dir_all(&cgroup_root).unwrap();
        let table = dir.path().join("mountinfo");
        std::fs::write(
            &table,
            format!(
                "30 25 0:26 / {} rw,nosuid,nodev,noexec,relatime - cgroup2 cgroup2 rw\n",
                cgroup_root.display()
            ),
        )
        .unwrap();
        Self {
            mounts: MountTable::from_file(table),
            config,
            _dir: dir,
        }
    }

    fn workspace(&self) -> WorkspaceManager {
        WorkspaceManager::with_mounts(&self.config, self.mounts.clone())
    }

    fn engine(&self) -> Engine {
        let network = NetworkManager::with_parts(
            self.config.network_dir(),
            Ipam::new(self.config.ipam_file()),
            Vec::new(),
            Box::new(KernelWiring::default()),
        )
        .unwrap();
        Engine::with_parts(
            &self.config,
            self.mounts.clone(),
            ProcessLauncher::new(&self.config),
            network,
        )
    }

    fn store(&self) -> StateStore {
        StateStore::new(&self.config)
    }

    fn layer_dirs(&self, name: &str) -> [PathBuf; 3] {
        [
            self.config.layers_dir().join(name),
            self.config.work_dir().join(name),
            self.config.mnt_dir().join(name),
        ]
    }

    fn fake_workspace(&self, name: &str) {
        for dir in self.layer_dirs(name) {
            std::fs::create_dir_all(dir).unwrap();
        }
        std::fs::write(self.config.layers_dir().join(name).join("changed"), "x").unwrap();
    }
}

fn record(name: &str, status: ContainerStatus, pid: Option<u32>) -> ContainerRecord {
    let mut rec = ContainerRecord::running(ContainerId::generate(), name, 1, &["sh".into()]);
    rec.status = status;
    rec.pid = pid;
    rec.image = "busybox".into();
    rec
}

fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

fn write_image(images_dir: &Path, name: &str) {
    std::fs::create_dir_all(images_dir).unwrap();
    let file = std::fs::File::create(images_dir.join(format!("{name}.tar"))).unwrap();
    let mut builder = tar::Builder::new(file);
    let data = b"hull\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, "etc/hostname", &data[..]).unwrap();
    builder.finish().unwrap();
}

// ── Workspace ────────────────────────────────────────────────────────

#[test]
fn teardown_twice_is_not_an_error() {
    let fx = Fixture::new();
    fx.fake_workspace("web");
    let ws = fx.workspace();

    ws.teardown("web", "/host/dir:/mnt/data").unwrap();
    ws.teardown("web", "/host/dir:/mnt/data").unwrap();
    for dir in fx.layer_dirs("web") {
        assert!(!dir.exists(), "{} left behind", dir.display());
    }
}

#[test]
fn teardown_of_never_built_workspace_is_not_an_error() {
    let fx = Fixture::new();
    fx.workspace().teardown("ghost", "onlyonepart").unwrap();
}

#[test]
fn teardown_keeps_base_layer() {
    let fx = Fixture::new();
    fx.fake_workspace("web");
    let base = fx.config.images_dir().join("busybox");
    std::fs::create_dir_all(&base).unwrap();

    fx.workspace().teardown("web", "").unwrap();
    assert!(base.is_dir());
}

#[test]
fn create_without_image_builds_nothing() {
    let fx = Fixture::new();
    let err = fx.workspace().create("missing", "web", "").unwrap_err();
    assert!(matches!(err, HullError::NotFound { kind: "image", .. }));
    for dir in fx.layer_dirs("web") {
        assert!(!dir.exists());
    }
}

#[test]
fn create_and_teardown_with_volume_as_root() {
    if !is_root() {
        return;
    }
    let fx = Fixture::new();
    write_image(&fx.config.images_dir(), "busybox");
    let host = fx.config.data_dir.join("volume");
    let volume = format!("{}:/mnt/data", host.display());
    let ws = WorkspaceManager::new(&fx.config);

    let Ok(layout) = ws.create("busybox", "web", &volume) else {
        // Overlay mounts are not permitted in every sandbox.
        return;
    };
    let live = MountTable::current();
    assert!(live.is_mount_point(&layout.merged).unwrap());
    assert!(live.is_mount_point(&layout.merged.join("mnt/data")).unwrap());
    assert!(layout.merged.join("etc/hostname").is_file());
    std::fs::write(layout.merged.join("mnt/data/from-container"), "hi").unwrap();

    ws.teardown("web", &volume).unwrap();
    assert!(!live.is_mount_point(&layout.merged).unwrap());
    assert!(!layout.merged.exists());
    assert!(host.join("from-container").is_file());
    ws.teardown("web", &volume).unwrap();
}

#[test]
fn malformed_volume_does_not_fail_create_as_root() {
    if !is_root() {
        return;
    }
    let fx = Fixture::new();
    write_image(&fx.config.images_dir(), "busybox");
    let ws = WorkspaceManager::new(&fx.config);
    let Ok(layout) = ws.create("busybox", "web", "onlyonepart") else {
        return;
    };
    assert!(layout.merged.join("etc/hostname").is_file());
    ws.teardown("web", "onlyonepart").unwrap();
}

// ── Engine ───────────────────────────────────────────────────────────

#[test]
fn run_rejects_conflicting_modes_without_side_effects() {
    let fx = Fixture::new();
    let options = RunOptions {
        image: "busybox".into(),
        command: vec!["sh".into()],
        name: Some("web".into()),
        tty: true,
        detach: true,
        ..RunOptions::default()
    };
    let err = fx.engine().run(&options).unwrap_err();
    assert!(matches!(err, HullError::InvalidInput { .. }));
    assert!(!fx.config.container_dir("web").exists());
}

#[test]
fn run_refuses_a_taken_name() {
    let fx = Fixture::new();
    fx.store()
        .save(&record("web", ContainerStatus::Stopped, None))
        .unwrap();
    let options = RunOptions {
        image: "busybox".into(),
        command: vec!["sh".into()],
        name: Some("web".into()),
        ..RunOptions::default()
    };
    let err = fx.engine().run(&options).unwrap_err();
    assert!(matches!(err, HullError::InvalidState { .. }));
}

#[test]
fn remove_refuses_running_container() {
    let fx = Fixture::new();
    fx.store()
        .save(&record("web", ContainerStatus::Running, Some(1)))
        .unwrap();
    let err = fx.engine().remove("web").unwrap_err();
    assert!(matches!(err, HullError::InvalidState { .. }));
    assert!(fx.store().exists("web"));
}

#[test]
fn remove_deletes_workspace_and_record() {
    let fx = Fixture::new();
    fx.fake_workspace("web");
    fx.store()
        .save(&record("web", ContainerStatus::Stopped, None))
        .unwrap();

    fx.engine().remove("web").unwrap();
    assert!(!fx.store().exists("web"));
    assert!(!fx.config.container_dir("web").exists());
    for dir in fx.layer_dirs("web") {
        assert!(!dir.exists());
    }
}

#[test]
fn remove_of_unknown_container_is_not_found() {
    let fx = Fixture::new();
    let err = fx.engine().remove("ghost").unwrap_err();
    assert!(matches!(err, HullError::NotFound { kind: "container", .. }));
}

#[test]
fn stop_terminates_and_marks_stopped() {
    let fx = Fixture::new();
    let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
    let pid = child.id();
    let reaper = std::thread::spawn(move || child.wait().unwrap());
    fx.store()
        .save(&record("web", ContainerStatus::Running, Some(pid)))
        .unwrap();

    fx.engine()
        .stop_within("web", Duration::from_secs(5))
        .unwrap();
    assert!(!reaper.join().unwrap().success());

    let rec = fx.store().load("web").unwrap();
    assert_eq!(rec.status, ContainerStatus::Stopped);
    assert_eq!(rec.pid, None);
}

#[test]
fn stop_of_vanished_process_marks_exited() {
    let fx = Fixture::new();
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();
    let _ = child.wait().unwrap();
    fx.store()
        .save(&record("web", ContainerStatus::Running, Some(pid)))
        .unwrap();

    fx.engine()
        .stop_within("web", Duration::from_secs(1))
        .unwrap();
    let rec = fx.store().load("web").unwrap();
    assert_eq!(rec.status, ContainerStatus::Exited);
    assert_eq!(rec.pid, None);

    fx.engine().remove("web").unwrap();
    assert!(!fx.store().exists("web"));
}

#[test]
fn stop_of_stopped_container_is_invalid() {
    let fx = Fixture::new();
    fx.store()
        .save(&record("web", ContainerStatus::Stopped, None))
        .unwrap();
    let err = fx.engine().stop("web").unwrap_err();
    assert!(matches!(err, HullError::InvalidState { .. }));
}

#[test]
fn exec_requires_running_container() {
    let fx = Fixture::new();
    fx.store()
        .save(&record("web", ContainerStatus::Stopped, None))
        .unwrap();
    let err = fx.engine().exec("web", &["ls".into()]).unwrap_err();
    assert!(matches!(err, HullError::InvalidState { .. }));
}
