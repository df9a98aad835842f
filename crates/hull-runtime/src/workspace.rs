//! Per-container root filesystem.
//!
//! A workspace is built in four steps, each one depending on the previous:
//!
//! 1. the image's read-only base layer under `<data>/images/<image>/`,
//!    shared between containers and never removed here;
//! 2. a writable layer `<data>/layers/<name>/` and its overlay scratch
//!    directory `<data>/work/<name>/`;
//! 3. the union mount at `<data>/mnt/<name>/`;
//! 4. optionally, a host directory bind-mounted inside the union.
//!
//! [`WorkspaceManager::teardown`] undoes them in reverse and tolerates any
//! of them being absent, so it can run after a partial build and can run
//! twice.

use std::path::{Component, Path, PathBuf};

use hull_common::config::HullConfig;
use hull_common::error::{HullError, Result};
use hull_core::filesystem::mount::{bind_mount, unmount_if_mounted};
use hull_core::filesystem::overlayfs::{OverlayConfig, mount_overlay};
use hull_core::mountinfo::MountTable;

use crate::image::ImageStore;

/// A parsed `host:container` volume spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Directory on the host.
    pub host: PathBuf,
    /// Where it appears inside the container.
    pub container: PathBuf,
}

impl VolumeSpec {
    /// Parses `host:container`.
    ///
    /// Returns `None` unless there are exactly two non-empty segments.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let (host, container) = raw.split_once(':')?;
        if host.is_empty() || container.is_empty() || container.contains(':') {
            return None;
        }
        Some(Self {
            host: PathBuf::from(host),
            container: PathBuf::from(container),
        })
    }

    /// Mount target of the volume below the container root `merged`.
    ///
    /// `..` and root components are dropped so the target cannot escape
    /// the container root.
    #[must_use]
    pub fn target_in(&self, merged: &Path) -> PathBuf {
        let relative: PathBuf = self
            .container
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        merged.join(relative)
    }
}

/// Locations making up one container's workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Unpacked image.
    pub base: PathBuf,
    /// Writable layer.
    pub upper: PathBuf,
    /// Overlay scratch directory.
    pub work: PathBuf,
    /// Union mount point, the container's root.
    pub merged: PathBuf,
}

/// Builds and tears down container workspaces.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    config: HullConfig,
    images: ImageStore,
    mounts: MountTable,
}

impl WorkspaceManager {
    /// Manager for the layout in `config`, reading the live mount table.
    #[must_use]
    pub fn new(config: &HullConfig) -> Self {
        Self::with_mounts(config, MountTable::current())
    }

    /// Manager consulting `mounts` to decide what is mounted.
    #[must_use]
    pub fn with_mounts(config: &HullConfig, mounts: MountTable) -> Self {
        Self {
            config: config.clone(),
            images: ImageStore::new(config.images_dir()),
            mounts,
        }
    }

    /// The workspace paths of container `name` built from `image`.
    #[must_use]
    pub fn layout(&self, image: &str, name: &str) -> Workspace {
        Workspace {
            base: self.images.base_dir(image),
            upper: self.config.layers_dir().join(name),
            work: self.config.work_dir().join(name),
            merged: self.config.mnt_dir().join(name),
        }
    }

    /// Builds the workspace of container `name` and returns its layout.
    ///
    /// A malformed `volume` is logged and skipped. On failure everything
    /// already built is torn down before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be unpacked or a directory or
    /// mount cannot be created.
    pub fn create(&self, image: &str, name: &str, volume: &str) -> Result<Workspace> {
        let base = self.images.ensure_unpacked(image)?;
        let workspace = Workspace {
            base,
            ..self.layout(image, name)
        };
        if let Err(e) = self.mount_layers(&workspace, volume) {
            if let Err(cleanup) = self.teardown(name, volume) {
                tracing::warn!(name, error = %cleanup, "workspace rollback incomplete");
            }
            return Err(e);
        }
        tracing::info!(name, image, root = %workspace.merged.display(), "workspace ready");
        Ok(workspace)
    }

    fn mount_layers(&self, workspace: &Workspace, volume: &str) -> Result<()> {
        mount_overlay(&OverlayConfig {
            lower_dirs: vec![workspace.base.clone()],
            upper_dir: workspace.upper.clone(),
            work_dir: workspace.work.clone(),
            merged_dir: workspace.merged.clone(),
        })?;
        if volume.is_empty() {
            return Ok(());
        }
        let Some(spec) = VolumeSpec::parse(volume) else {
            tracing::warn!(volume, "malformed volume spec, skipping");
            return Ok(());
        };
        let target = spec.target_in(&workspace.merged);
        for dir in [&spec.host, &target] {
            std::fs::create_dir_all(dir).map_err(|e| HullError::io(dir, e))?;
        }
        bind_mount(&spec.host, &target)?;
        tracing::info!(host = %spec.host.display(), target = %target.display(), "volume mounted");
        Ok(())
    }

    /// Tears down the workspace of container `name`.
    ///
    /// Steps run in reverse build order: volume, union mount, mount point,
    /// writable layer, work directory. Each is attempted even if an earlier
    /// one failed; the base layer is left alone.
    ///
    /// # Errors
    ///
    /// Returns the first step that failed for a reason other than the
    /// resource being absent.
    pub fn teardown(&self, name: &str, volume: &str) -> Result<()> {
        let merged = self.config.mnt_dir().join(name);
        let mut errors = Vec::new();

        if let Some(spec) = VolumeSpec::parse(volume) {
            record(&mut errors, unmount_if_mounted(&self.mounts, &spec.target_in(&merged)));
        }
        record(&mut errors, unmount_if_mounted(&self.mounts, &merged));
        record(&mut errors, remove_dir(&merged));
        record(&mut errors, remove_tree(&self.config.layers_dir().join(name)));
        record(&mut errors, remove_tree(&self.config.work_dir().join(name)));

        for e in errors.iter().skip(1) {
            tracing::warn!(name, error = %e, "additional teardown failure");
        }
        match errors.into_iter().next() {
            Some(first) => Err(first),
            None => {
                tracing::debug!(name, "workspace torn down");
                Ok(())
            }
        }
    }
}

fn record<T>(errors: &mut Vec<HullError>, step: Result<T>) {
    if let Err(e) = step {
        errors.push(e);
    }
}

/// Removes an (expected empty) mount point; never recurses into it.
fn remove_dir(path: &Path) -> Result<()> {
    match std::fs::remove_dir(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(HullError::io(path, e)),
        _ => Ok(()),
    }
}

fn remove_tree(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(HullError::io(path, e)),
        _ => Ok(()),
    }
}
