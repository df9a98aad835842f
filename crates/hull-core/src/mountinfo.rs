//! Parser for the per-process mount table (`/proc/<pid>/mountinfo`).
//!
//! Each line has the shape
//! `id parent major:minor root mount_point options [optional...] - fstype source super_options`.
//! The table is re-read on every query; nothing is cached.

use std::path::{Path, PathBuf};

use hull_common::error::{HullError, Result};

/// Default mount table of the calling process.
pub const SELF_MOUNTINFO: &str = "/proc/self/mountinfo";

/// One parsed mount table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Where the filesystem is mounted.
    pub mount_point: PathBuf,
    /// Filesystem type, e.g. `cgroup`, `cgroup2`, `overlay`.
    pub fs_type: String,
    /// Filesystem-specific options, e.g. `rw,memory`.
    pub super_options: Vec<String>,
}

impl MountEntry {
    /// Returns whether `option` is one of the filesystem-specific options.
    #[must_use]
    pub fn has_option(&self, option: &str) -> bool {
        self.super_options.iter().any(|o| o == option)
    }
}

/// Handle on a mountinfo source.
#[derive(Debug, Clone)]
pub struct MountTable {
    source: PathBuf,
}

impl Default for MountTable {
    fn default() -> Self {
        Self::current()
    }
}

impl MountTable {
    /// Mount table of the calling process.
    #[must_use]
    pub fn current() -> Self {
        Self {
            source: PathBuf::from(SELF_MOUNTINFO),
        }
    }

    /// Mount table read from an arbitrary file in mountinfo format.
    #[must_use]
    pub fn from_file(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Reads and parses every entry. Malformed lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read.
    pub fn entries(&self) -> Result<Vec<MountEntry>> {
        let content =
            std::fs::read_to_string(&self.source).map_err(|e| HullError::io(&self.source, e))?;
        Ok(content.lines().filter_map(parse_line).collect())
    }

    /// Returns whether `path` is currently a mount point.
    ///
    /// A path that does not exist is never a mount point.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table cannot be read.
    pub fn is_mount_point(&self, path: &Path) -> Result<bool> {
        let Ok(path) = std::fs::canonicalize(path) else {
            return Ok(false);
        };
        Ok(self.entries()?.iter().any(|m| m.mount_point == path))
    }
}

/// Parses a single mountinfo line.
#[must_use]
pub fn parse_line(line: &str) -> Option<MountEntry> {
    let (left, right) = line.split_once(" - ")?;
    let mount_point = left.split_whitespace().nth(4)?;
    let mut right = right.split_whitespace();
    let fs_type = right.next()?;
    let _source = right.next()?;
    let super_options = right
        .next()
        .map(|opts| opts.split(',').map(str::to_owned).collect())
        .unwrap_or_default();

    Some(MountEntry {
        mount_point: PathBuf::from(unescape(mount_point)),
        fs_type: fs_type.to_owned(),
        super_options,
    })
}

/// Decodes the kernel's octal escapes (`\040` for space, `\011` for tab, ...).
fn unescape(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap_or("");
            if let Ok(value) = u8::from_str_radix(digits, 8) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
