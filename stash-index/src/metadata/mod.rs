//! Per-backup metadata manifest.
//!
//! A manifest is created at the start of a run, filled in by concurrent
//! workers as files are captured, and written once as `metadata.json` next to
//! the backup payload. Loaded manifests are only ever inspected.

pub mod summary;
pub mod types;

pub use types::{BackupType, CategoryTiming, FileInfo};

use crate::{Result, StashError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Manifest format version
pub const METADATA_VERSION: &str = "1.0";

/// File name of the manifest inside a backup payload
pub const METADATA_FILE_NAME: &str = "metadata.json";

fn is_zero(value: &u64) -> bool {
    *value == 0
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Serialized form of the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub username: String,

    /// In capture order
    #[serde(default)]
    pub files: Vec<FileInfo>,

    #[serde(default)]
    pub package_counts: BTreeMap<String, u64>,

    /// Sum of sizes of all non-directory entries
    #[serde(default)]
    pub backup_size: u64,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub compressed_size: u64,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub encrypted_size: u64,

    #[serde(
        default,
        with = "types::duration_nanos",
        skip_serializing_if = "Duration::is_zero"
    )]
    pub total_duration: Duration,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub categories: HashMap<String, CategoryTiming>,

    /// Unset means full
    #[serde(
        default,
        with = "types::optional_backup_type",
        skip_serializing_if = "Option::is_none"
    )]
    pub backup_type: Option<BackupType>,

    /// Name of the full backup an incremental run extends
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_backup: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub changed_files_only: bool,
}

impl MetadataDocument {
    pub fn new(hostname: String, username: String) -> Self {
        Self {
            version: METADATA_VERSION.to_string(),
            timestamp: Utc::now(),
            hostname,
            username,
            files: Vec::new(),
            package_counts: BTreeMap::new(),
            backup_size: 0,
            compressed_size: 0,
            encrypted_size: 0,
            total_duration: Duration::ZERO,
            categories: HashMap::new(),
            backup_type: None,
            base_backup: String::new(),
            changed_files_only: false,
        }
    }

    pub fn is_incremental(&self) -> bool {
        self.backup_type == Some(BackupType::Incremental)
    }

    pub fn is_full(&self) -> bool {
        matches!(self.backup_type, None | Some(BackupType::Full))
    }

    /// Effective type, with unset reported as full.
    pub fn effective_backup_type(&self) -> BackupType {
        self.backup_type.unwrap_or(BackupType::Full)
    }

    /// The `n` largest entries, ties kept in capture order.
    pub fn largest_files(&self, n: usize) -> Vec<FileInfo> {
        let mut sorted: Vec<&FileInfo> = self.files.iter().collect();
        sorted.sort_by(|a, b| b.size.cmp(&a.size));
        sorted.into_iter().take(n).cloned().collect()
    }

    /// Percentage saved by compression; 0 when nothing was captured.
    pub fn compression_ratio(&self) -> f64 {
        if self.backup_size == 0 {
            return 0.0;
        }
        (1.0 - self.compressed_size as f64 / self.backup_size as f64) * 100.0
    }

    /// Number of non-directory entries.
    pub fn file_count(&self) -> usize {
        self.files.iter().filter(|f| !f.is_dir).count()
    }

    pub fn dir_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_dir).count()
    }

    fn push(&mut self, info: FileInfo) {
        self.backup_size += info.counted_size();
        self.files.push(info);
    }
}

/// Thread-safe manifest builder for one backup run.
#[derive(Debug)]
pub struct Metadata {
    state: RwLock<MetadataDocument>,
}

impl Metadata {
    /// Start a manifest stamped with the local host and user.
    pub fn new() -> Self {
        Self::with_identity(local_hostname(), local_username())
    }

    pub fn with_identity(hostname: impl Into<String>, username: impl Into<String>) -> Self {
        Self::from_document(MetadataDocument::new(hostname.into(), username.into()))
    }

    pub fn from_document(document: MetadataDocument) -> Self {
        Self {
            state: RwLock::new(document),
        }
    }

    /// Clone of the current document.
    pub fn snapshot(&self) -> MetadataDocument {
        self.state.read().clone()
    }

    /// Consume the builder, returning the document.
    pub fn into_document(self) -> MetadataDocument {
        self.state.into_inner()
    }

    /// Stat and hash `original_path`, then append it.
    ///
    /// Filesystem errors are returned as-is; nothing is appended on failure.
    pub fn add_file(&self, original_path: &Path, backup_path: &Path) -> Result<()> {
        let info = FileInfo::capture(original_path, backup_path)?;
        self.add_file_info(info);
        Ok(())
    }

    /// Append a fully populated entry without touching the filesystem.
    pub fn add_file_info(&self, info: FileInfo) {
        self.state.write().push(info);
    }

    pub fn set_package_count(&self, manager: &str, count: u64) {
        self.state
            .write()
            .package_counts
            .insert(manager.to_string(), count);
    }

    pub fn set_compressed_size(&self, size: u64) {
        self.state.write().compressed_size = size;
    }

    pub fn set_encrypted_size(&self, size: u64) {
        self.state.write().encrypted_size = size;
    }

    pub fn set_total_duration(&self, duration: Duration) {
        self.state.write().total_duration = duration;
    }

    pub fn set_backup_type(&self, backup_type: BackupType) {
        self.state.write().backup_type = Some(backup_type);
    }

    pub fn set_base_backup(&self, name: &str) {
        self.state.write().base_backup = name.to_string();
    }

    pub fn set_changed_files_only(&self, changed_only: bool) {
        self.state.write().changed_files_only = changed_only;
    }

    /// Record timing for a category, replacing any earlier entry of that name.
    pub fn add_category_timing(&self, timing: CategoryTiming) {
        self.state
            .write()
            .categories
            .insert(timing.name.clone(), timing);
    }

    pub fn is_incremental(&self) -> bool {
        self.state.read().is_incremental()
    }

    pub fn is_full(&self) -> bool {
        self.state.read().is_full()
    }

    pub fn base_backup(&self) -> Option<String> {
        let state = self.state.read();
        (!state.base_backup.is_empty()).then(|| state.base_backup.clone())
    }

    pub fn backup_size(&self) -> u64 {
        self.state.read().backup_size
    }

    pub fn largest_files(&self, n: usize) -> Vec<FileInfo> {
        self.state.read().largest_files(n)
    }

    pub fn compression_ratio(&self) -> f64 {
        self.state.read().compression_ratio()
    }

    pub fn file_count(&self) -> usize {
        self.state.read().file_count()
    }

    /// Human-readable report of the manifest.
    pub fn summary(&self) -> String {
        summary::render(&self.state.read())
    }

    /// Write the manifest as pretty-printed JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = {
            let state = self.state.read();
            serde_json::to_vec_pretty(&*state)?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, path)?;

        debug!("Saved manifest to {}", path.display());
        Ok(())
    }

    /// Load a manifest. Unlike the index, a missing file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                StashError::ManifestNotFound(path.display().to_string())
            }
            _ => StashError::Io(e),
        })?;
        let document: MetadataDocument = serde_json::from_slice(&raw)?;
        Ok(Self::from_document(document))
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(unix)]
fn local_username() -> String {
    use nix::unistd::{getuid, User};

    User::from_uid(getuid())
        .ok()
        .flatten()
        .map(|user| user.name)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(not(unix))]
fn local_username() -> String {
    std::env::var("USERNAME").unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn entry(name: &str, size: u64) -> FileInfo {
        FileInfo {
            original_path: PathBuf::from(format!("/home/me/{name}")),
            backup_path: PathBuf::from(format!("dotfiles/{name}")),
            size,
            mode: 0o644,
            mod_time: Utc::now(),
            checksum: "abc".to_string(),
            is_dir: false,
        }
    }

    fn dir_entry(name: &str) -> FileInfo {
        FileInfo {
            size: 4096,
            is_dir: true,
            checksum: String::new(),
            ..entry(name, 0)
        }
    }

    #[test]
    fn test_new_defaults() {
        let metadata = Metadata::with_identity("host", "me");
        let doc = metadata.snapshot();

        assert_eq!(doc.version, METADATA_VERSION);
        assert_eq!(doc.hostname, "host");
        assert_eq!(doc.username, "me");
        assert!(doc.files.is_empty());
        assert_eq!(doc.backup_size, 0);
        assert!(doc.backup_type.is_none());
        assert!(metadata.is_full());
        assert!(!metadata.is_incremental());
    }

    #[test]
    fn test_local_identity_is_filled() {
        let doc = Metadata::new().snapshot();
        assert!(!doc.hostname.is_empty());
        assert!(!doc.username.is_empty());
    }

    #[test]
    fn test_add_file_accumulates_size() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("config");
        fs::write(&file, vec![b'x'; 1234]).unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();

        let metadata = Metadata::with_identity("host", "me");
        metadata.add_file(&sub, Path::new("dotfiles/sub")).unwrap();
        assert_eq!(metadata.backup_size(), 0);

        metadata.add_file(&file, Path::new("dotfiles/config")).unwrap();
        assert_eq!(metadata.backup_size(), 1234);
        assert_eq!(metadata.file_count(), 1);

        let doc = metadata.snapshot();
        assert_eq!(doc.files.len(), 2);
        assert_eq!(doc.dir_count(), 1);
        assert!(doc.files[0].checksum.is_empty());
        assert_eq!(doc.files[1].checksum.len(), 64);
    }

    #[test]
    fn test_add_missing_file_propagates() {
        let dir = TempDir::new().unwrap();
        let metadata = Metadata::with_identity("host", "me");

        let err = metadata
            .add_file(&dir.path().join("missing"), Path::new("x/missing"))
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(metadata.snapshot().files.is_empty());
    }

    #[test]
    fn test_add_file_info_directory_adds_no_size() {
        let metadata = Metadata::with_identity("host", "me");
        metadata.add_file_info(dir_entry(".config"));
        metadata.add_file_info(entry("a", 300));

        assert_eq!(metadata.backup_size(), 300);
        assert_eq!(metadata.file_count(), 1);
    }

    #[test]
    fn test_compression_ratio() {
        let metadata = Metadata::with_identity("host", "me");
        assert_eq!(metadata.compression_ratio(), 0.0);

        metadata.add_file_info(entry("a", 1000));
        metadata.set_compressed_size(500);
        assert_eq!(metadata.compression_ratio(), 50.0);
    }

    #[test]
    fn test_largest_files() {
        let metadata = Metadata::with_identity("host", "me");
        metadata.add_file_info(entry("small", 100));
        metadata.add_file_info(entry("big", 500));
        metadata.add_file_info(entry("mid", 200));

        let sizes: Vec<u64> = metadata.largest_files(2).iter().map(|f| f.size).collect();
        assert_eq!(sizes, vec![500, 200]);
        assert_eq!(metadata.largest_files(10).len(), 3);
    }

    #[test]
    fn test_largest_files_ties_keep_capture_order() {
        let metadata = Metadata::with_identity("host", "me");
        metadata.add_file_info(entry("first", 100));
        metadata.add_file_info(entry("second", 100));
        metadata.add_file_info(entry("third", 100));

        let names: Vec<PathBuf> = metadata
            .largest_files(3)
            .into_iter()
            .map(|f| f.backup_path)
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("dotfiles/first"),
                PathBuf::from("dotfiles/second"),
                PathBuf::from("dotfiles/third"),
            ]
        );
    }

    #[test]
    fn test_backup_type_classification() {
        let metadata = Metadata::with_identity("host", "me");
        assert!(metadata.is_full());

        metadata.set_backup_type(BackupType::Full);
        assert!(metadata.is_full());
        assert!(!metadata.is_incremental());

        metadata.set_backup_type(BackupType::Incremental);
        assert!(!metadata.is_full());
        assert!(metadata.is_incremental());
    }

    #[test]
    fn test_empty_backup_type_string_is_full() {
        let mut value = serde_json::to_value(Metadata::with_identity("h", "u").snapshot()).unwrap();
        value["backup_type"] = serde_json::json!("");

        let doc: MetadataDocument = serde_json::from_value(value).unwrap();
        assert!(doc.backup_type.is_none());
        assert!(doc.is_full());
    }

    #[test]
    fn test_setters_last_write_wins() {
        let metadata = Metadata::with_identity("host", "me");
        metadata.set_package_count("homebrew", 10);
        metadata.set_package_count("homebrew", 12);
        metadata.set_package_count("npm", 3);
        metadata.set_encrypted_size(900);
        metadata.set_total_duration(Duration::from_secs(5));
        metadata.set_base_backup("full-1");
        metadata.set_base_backup("full-2");
        metadata.set_changed_files_only(true);
        metadata.add_category_timing(CategoryTiming {
            name: "ssh".into(),
            file_count: 1,
            total_size: 10,
            duration: Duration::from_millis(3),
        });
        metadata.add_category_timing(CategoryTiming {
            name: "ssh".into(),
            file_count: 2,
            total_size: 20,
            duration: Duration::from_millis(4),
        });

        let doc = metadata.snapshot();
        assert_eq!(doc.package_counts["homebrew"], 12);
        assert_eq!(doc.package_counts["npm"], 3);
        assert_eq!(doc.encrypted_size, 900);
        assert_eq!(doc.total_duration, Duration::from_secs(5));
        assert_eq!(metadata.base_backup().as_deref(), Some("full-2"));
        assert!(doc.changed_files_only);
        assert_eq!(doc.categories.len(), 1);
        assert_eq!(doc.categories["ssh"].file_count, 2);
    }

    #[test]
    fn test_optional_fields_omitted() {
        let value = serde_json::to_value(Metadata::with_identity("h", "u").snapshot()).unwrap();
        for key in [
            "compressed_size",
            "encrypted_size",
            "total_duration",
            "categories",
            "backup_type",
            "base_backup",
            "changed_files_only",
        ] {
            assert!(value.get(key).is_none(), "{key} should be omitted");
        }
        assert_eq!(value["backup_size"], 0);
        assert!(value["files"].is_array());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let metadata = Metadata::with_identity("host", "me");
        metadata.add_file_info(entry("a", 10));
        metadata.add_file_info(dir_entry("d"));
        metadata.set_backup_type(BackupType::Incremental);
        metadata.set_base_backup("full-1");
        metadata.set_changed_files_only(true);
        metadata.set_compressed_size(7);
        metadata.set_total_duration(Duration::from_nanos(1_234_567));

        let path = dir.path().join("backup-1").join(METADATA_FILE_NAME);
        metadata.save(&path).unwrap();

        let loaded = Metadata::load(&path).unwrap();
        assert_eq!(loaded.snapshot(), metadata.snapshot());
        assert!(loaded.is_incremental());
    }

    #[test]
    fn test_save_replaces_previous_manifest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(METADATA_FILE_NAME);
        let metadata = Metadata::with_identity("host", "me");

        metadata.add_file_info(entry("a", 10));
        metadata.save(&path).unwrap();
        metadata.add_file_info(entry("b", 5));
        metadata.save(&path).unwrap();

        let loaded = Metadata::load(&path).unwrap();
        assert_eq!(loaded.file_count(), 2);
        assert_eq!(loaded.snapshot().backup_size, 15);

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from(METADATA_FILE_NAME)]);
    }

    #[test]
    fn test_load_missing_or_malformed_fails() {
        let dir = TempDir::new().unwrap();

        let err = Metadata::load(&dir.path().join(METADATA_FILE_NAME)).unwrap_err();
        assert!(matches!(err, StashError::ManifestNotFound(_)));

        let bad = dir.path().join("bad.json");
        fs::write(&bad, b"{ broken").unwrap();
        assert!(matches!(
            Metadata::load(&bad).unwrap_err(),
            StashError::Serialization(_)
        ));
    }

    #[test]
    fn test_concurrent_adds_lose_nothing() {
        let dir = TempDir::new().unwrap();
        let paths: Vec<PathBuf> = (0..40)
            .map(|i| {
                let path = dir.path().join(format!("f{i}"));
                fs::write(&path, vec![b'y'; i * 3]).unwrap();
                path
            })
            .collect();

        let metadata = Arc::new(Metadata::with_identity("host", "me"));
        std::thread::scope(|scope| {
            for (worker, chunk) in paths.chunks(10).enumerate() {
                let metadata = Arc::clone(&metadata);
                scope.spawn(move || {
                    for path in chunk {
                        metadata
                            .add_file(path, Path::new("files").join(path.file_name().unwrap()).as_path())
                            .unwrap();
                    }
                    metadata.add_file_info(entry(&format!("extra{worker}"), 1));
                });
            }
        });

        let doc = metadata.snapshot();
        assert_eq!(doc.files.len(), 44);
        assert_eq!(doc.backup_size, (0..40u64).map(|i| i * 3).sum::<u64>() + 4);
        assert_eq!(
            doc.backup_size,
            doc.files.iter().map(FileInfo::counted_size).sum::<u64>()
        );
    }
}
