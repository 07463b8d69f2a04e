//! Stat helpers shared by the index and the manifest.
//!
//! A single `stat` yields everything the fingerprint and manifest entries
//! need: size, modification time, permission bits and the directory flag.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;

/// Live filesystem metadata for one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// File size in bytes
    pub size: u64,

    /// Last modified time, nanosecond precision
    pub modified: DateTime<Utc>,

    /// Permission bits (Unix mode without file-type bits)
    pub mode: u32,

    /// Is this a directory?
    pub is_dir: bool,
}

impl FileStat {
    /// Stat a path, following symlinks.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let modified = DateTime::<Utc>::from(metadata.modified()?);

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            metadata.permissions().mode() & 0o7777
        };

        #[cfg(not(unix))]
        let mode = if metadata.permissions().readonly() { 0o444 } else { 0o644 };

        Ok(Self {
            size: metadata.len(),
            modified,
            mode,
            is_dir: metadata.is_dir(),
        })
    }

    /// Stat a path, mapping "not found" to `None`.
    pub fn try_from_path(path: &Path) -> std::io::Result<Option<Self>> {
        match Self::from_path(path) {
            Ok(stat) => Ok(Some(stat)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Whether content hashing is meaningful for this entry.
    pub fn wants_checksum(&self) -> bool {
        !self.is_dir && self.size > 0
    }
}

/// Reject paths that cannot be written to a JSON document.
pub fn require_utf8(path: &Path) -> std::io::Result<()> {
    if path.to_str().is_none() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("path is not valid UTF-8: {}", path.display()),
        ));
    }
    Ok(())
}
