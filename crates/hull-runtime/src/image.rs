//! Local image archives and their unpacked base layers.
//!
//! An image named `busybox` is the archive `<data>/images/busybox.tar`
//! (or `.tar.gz` / `.tgz`). The first container using it unpacks the
//! archive into `<data>/images/busybox/`, which then stays as the shared
//! read-only base of every container built from that image.

use std::path::{Path, PathBuf};

use hull_common::error::{HullError, Result};

/// Archive suffixes tried, in order, when resolving an image name.
const ARCHIVE_SUFFIXES: [&str; 3] = ["tar", "tar.gz", "tgz"];

/// Resolves image names to archives and unpacked base layers.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    /// Store rooted at `images_dir`.
    #[must_use]
    pub fn new(images_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: images_dir.into(),
        }
    }

    /// Directory holding the unpacked base layer of `image`.
    #[must_use]
    pub fn base_dir(&self, image: &str) -> PathBuf {
        self.root.join(image)
    }

    /// Finds the archive of `image`.
    ///
    /// # Errors
    ///
    /// Returns [`HullError::NotFound`] if no archive exists.
    pub fn archive(&self, image: &str) -> Result<PathBuf> {
        ARCHIVE_SUFFIXES
            .iter()
            .map(|suffix| self.root.join(format!("{image}.{suffix}")))
            .find(|p| p.is_file())
            .ok_or_else(|| HullError::NotFound {
                kind: "image",
                id: image.to_owned(),
            })
    }

    /// Returns the base layer of `image`, unpacking its archive first if
    /// the layer does not exist yet.
    ///
    /// Unpacking goes through a staging directory that is renamed into
    /// place, so a half-extracted archive is never mistaken for a base.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid names, a missing archive or a failed
    /// extraction.
    pub fn ensure_unpacked(&self, image: &str) -> Result<PathBuf> {
        validate_name(image)?;
        let base = self.base_dir(image);
        if base.is_dir() {
            return Ok(base);
        }
        let archive = self.archive(image)?;
        let staging = self.root.join(format!(".{image}.partial"));
        if staging.exists() {
            std::fs::remove_dir_all(&staging).map_err(|e| HullError::io(&staging, e))?;
        }
        if let Err(e) = extract_archive(&archive, &staging) {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }
        std::fs::rename(&staging, &base).map_err(|e| HullError::io(&base, e))?;
        tracing::info!(image, base = %base.display(), "base layer ready");
        Ok(base)
    }
}

fn validate_name(image: &str) -> Result<()> {
    if image.is_empty() || image.starts_with('.') || image.contains('/') {
        return Err(HullError::InvalidInput {
            message: format!("invalid image name {image:?}"),
        });
    }
    Ok(())
}

/// Extracts a tar archive into `target`, creating it.
///
/// Gzip compression is detected from the `.gz` / `.tgz` extension.
///
/// # Errors
///
/// Returns an error if the archive cannot be opened or unpacked.
pub fn extract_archive(archive_path: &Path, target: &Path) -> Result<()> {
    tracing::info!(
        archive = %archive_path.display(),
        target = %target.display(),
        "extracting image"
    );
    std::fs::create_dir_all(target).map_err(|e| HullError::io(target, e))?;
    let file = std::fs::File::open(archive_path).map_err(|e| HullError::io(archive_path, e))?;
    let unpacked = if is_gzip_archive(archive_path) {
        tar::Archive::new(flate2::read::GzDecoder::new(file)).unpack(target)
    } else {
        tar::Archive::new(file).unpack(target)
    };
    unpacked.map_err(|e| HullError::io(target, e))
}

fn is_gzip_archive(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("tgz"))
}
