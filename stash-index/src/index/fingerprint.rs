//! Per-file fingerprints.

use crate::fs::checksum::sha256_file;
use crate::fs::metadata::require_utf8;
use crate::fs::FileStat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Last-known state of one file, as captured by a backup run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub path: PathBuf,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    /// SHA-256 of the content; empty for directories and zero-byte files.
    #[serde(default)]
    pub checksum: String,
    /// Name of the backup run that captured this version.
    #[serde(default)]
    pub backuped_in: String,
}

impl FileFingerprint {
    /// Stat `path` and hash its content, tagging the result with `backup_name`.
    ///
    /// Paths that are not valid UTF-8 are rejected with `InvalidInput`.
    pub fn capture(path: &Path, backup_name: &str) -> std::io::Result<Self> {
        require_utf8(path)?;
        let stat = FileStat::from_path(path)?;
        let checksum = if stat.wants_checksum() {
            sha256_file(path)?
        } else {
            String::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            size: stat.size,
            mod_time: stat.modified,
            checksum,
            backuped_in: backup_name.to_string(),
        })
    }

    /// Size and mtime both match the live stat. Content is not compared.
    pub fn matches(&self, stat: &FileStat) -> bool {
        self.size == stat.size && self.mod_time == stat.modified
    }
}
