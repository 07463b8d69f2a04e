//! Configuration management for the stash index.
//!
//! Loads configuration from a TOML file with environment variable overrides.
//! This is the only place that consults the home directory; the index and
//! manifest types always receive explicit paths.

use crate::index::DEFAULT_INDEX_FILE_NAME;
use crate::metadata::METADATA_FILE_NAME;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Location of the fingerprint index
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Days between full backups
    #[serde(default = "default_full_backup_interval_days")]
    pub full_backup_interval_days: u32,

    /// Manifest file name inside each backup
    #[serde(default = "default_metadata_file")]
    pub metadata_file: String,

    /// File names skipped when expanding directories
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Concurrent fingerprinting workers
    #[serde(default = "default_fingerprint_workers")]
    pub fingerprint_workers: usize,
}

// Default values
fn default_index_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_INDEX_FILE_NAME)
}

fn default_full_backup_interval_days() -> u32 {
    7
}

fn default_metadata_file() -> String {
    METADATA_FILE_NAME.to_string()
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        ".git".to_string(),
        "node_modules".to_string(),
        ".DS_Store".to_string(),
    ]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_fingerprint_workers() -> usize {
    4
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            full_backup_interval_days: default_full_backup_interval_days(),
            metadata_file: default_metadata_file(),
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            fingerprint_workers: default_fingerprint_workers(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `STASH_INDEX_PATH` and `STASH_LOG_LEVEL` if set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(path) = std::env::var_os("STASH_INDEX_PATH") {
            self.index.path = PathBuf::from(path);
        }
        if let Ok(level) = std::env::var("STASH_LOG_LEVEL") {
            self.log.level = level;
        }
        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.performance.fingerprint_workers == 0 {
            return Err(crate::StashError::Config(
                "performance.fingerprint_workers must be at least 1".to_string(),
            ));
        }
        if self.backup.metadata_file.is_empty() {
            return Err(crate::StashError::Config(
                "backup.metadata_file must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn full_backup_interval(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.backup.full_backup_interval_days))
    }
}
