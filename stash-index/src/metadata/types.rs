//! Manifest entry types.

use crate::fs::checksum::sha256_file;
use crate::fs::metadata::require_utf8;
use crate::fs::FileStat;
use crate::StashError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// One captured file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Where the file lives on the source machine
    pub original_path: PathBuf,

    /// Location inside the backup payload, e.g. `dotfiles/.zshrc`
    pub backup_path: PathBuf,

    pub size: u64,

    /// Permission bits (Unix mode without file-type bits)
    pub mode: u32,

    pub mod_time: DateTime<Utc>,

    /// SHA-256 of the content; empty for directories
    #[serde(default)]
    pub checksum: String,

    pub is_dir: bool,
}

impl FileInfo {
    /// Stat `original_path` and hash it unless it is a directory.
    pub fn capture(original_path: &Path, backup_path: &Path) -> std::io::Result<Self> {
        require_utf8(original_path)?;
        require_utf8(backup_path)?;
        let stat = FileStat::from_path(original_path)?;
        let checksum = if stat.is_dir {
            String::new()
        } else {
            sha256_file(original_path)?
        };

        Ok(Self {
            original_path: original_path.to_path_buf(),
            backup_path: backup_path.to_path_buf(),
            size: stat.size,
            mode: stat.mode,
            mod_time: stat.modified,
            checksum,
            is_dir: stat.is_dir,
        })
    }

    /// Bytes this entry adds to the backup total. Directories add nothing.
    pub fn counted_size(&self) -> u64 {
        if self.is_dir {
            0
        } else {
            self.size
        }
    }

    /// Top-level category: the first component of the backup path.
    pub fn category(&self) -> String {
        self.backup_path
            .components()
            .next()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .unwrap_or_else(|| "other".to_string())
    }
}

/// Reporting statistics for one logical group captured during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTiming {
    pub name: String,
    pub file_count: usize,
    pub total_size: u64,
    #[serde(with = "duration_nanos")]
    pub duration: Duration,
}

/// Whether a run captured everything or only what changed since a base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackupType {
    Full,
    Incremental,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Incremental => "incremental",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(BackupType::Full),
            "incremental" => Ok(BackupType::Incremental),
            other => Err(StashError::InvalidBackupType(other.to_string())),
        }
    }
}

impl Serialize for BackupType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BackupType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// `backup_type` as stored: absent, `null` and `""` all decode as unset.
pub(crate) mod optional_backup_type {
    use super::BackupType;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<BackupType>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(t) => serializer.serialize_str(t.as_str()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<BackupType>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) if raw.is_empty() => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(serde::de::Error::custom),
        }
    }
}

/// Durations as integer nanoseconds.
pub(crate) mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = u64::try_from(value.as_nanos()).unwrap_or(u64::MAX);
        serializer.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_nanos(u64::deserialize(deserializer)?))
    }
}
