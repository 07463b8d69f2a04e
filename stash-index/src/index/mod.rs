//! Persistent fingerprint index.
//!
//! The index maps every file ever backed up to its last-known fingerprint and
//! answers "has this file changed since it was captured?" using size and
//! modification time only. It also tracks when the last full and the last
//! backup of any kind happened, which drives the full/incremental cadence.
//!
//! One instance is shared across workers for the lifetime of a run. State
//! lives behind a reader/writer lock owned by [`FingerprintIndex`]; accessors
//! take the shared side, mutations take the exclusive side only for the
//! in-memory edit. Stat and checksum work always happens outside the lock.

pub mod fingerprint;

pub use fingerprint::FileFingerprint;

use crate::fs::FileStat;
use crate::{Result, StashError};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Index document format version
pub const INDEX_VERSION: &str = "1.0";

/// Default file name of the index inside the user's home directory
pub const DEFAULT_INDEX_FILE_NAME: &str = ".stash-index.json";

/// What re-fingerprinting one path did to the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathUpdate {
    /// Fingerprint written; carries the file size
    Updated(u64),
    /// File is gone and its stale fingerprint was dropped
    Removed,
    Skipped,
}

/// Totals of an index update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub updated: usize,
    pub removed: usize,
    pub skipped: usize,
    pub bytes: u64,
}

impl UpdateOutcome {
    pub fn record(&mut self, update: PathUpdate) {
        match update {
            PathUpdate::Updated(size) => {
                self.updated += 1;
                self.bytes += size;
            }
            PathUpdate::Removed => self.removed += 1,
            PathUpdate::Skipped => self.skipped += 1,
        }
    }
}

/// Serialized form of the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexState {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_full_backup: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_full_backup_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_backup: Option<DateTime<Utc>>,

    /// A `null` or missing map decodes as empty.
    #[serde(default, deserialize_with = "null_as_default")]
    pub files: BTreeMap<PathBuf, FileFingerprint>,
}

fn default_version() -> String {
    INDEX_VERSION.to_string()
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Default for IndexState {
    fn default() -> Self {
        Self {
            version: default_version(),
            last_full_backup: None,
            last_full_backup_name: String::new(),
            last_backup: None,
            files: BTreeMap::new(),
        }
    }
}

/// Thread-safe fingerprint index
#[derive(Debug, Default)]
pub struct FingerprintIndex {
    state: RwLock<IndexState>,
}

impl FingerprintIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an already decoded state.
    pub fn from_state(state: IndexState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    /// Load an index from disk. A missing file yields an empty index.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No index at {}, starting empty", path.display());
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };

        let state: IndexState = serde_json::from_slice(&raw)?;
        debug!(
            "Loaded index from {} ({} files)",
            path.display(),
            state.files.len()
        );

        Ok(Self::from_state(state))
    }

    /// Write the index as pretty-printed JSON, creating parent directories.
    ///
    /// Serialization happens under the shared lock; the write does not hold it.
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

        debug!("Saved index to {}", path.display());
        Ok(())
    }

    /// Clone of the current state.
    pub fn snapshot(&self) -> IndexState {
        self.state.read().clone()
    }

    pub fn version(&self) -> String {
        self.state.read().version.clone()
    }

    /// Insert or replace the fingerprint for `path`.
    ///
    /// Paths that are not valid UTF-8 cannot be saved and are rejected.
    pub fn add_file(&self, path: impl Into<PathBuf>, fingerprint: FileFingerprint) -> Result<()> {
        let path = path.into();
        for candidate in [&path, &fingerprint.path] {
            if candidate.to_str().is_none() {
                return Err(StashError::InvalidPath(candidate.display().to_string()));
            }
        }

        self.state.write().files.insert(path, fingerprint);
        Ok(())
    }

    pub fn get_file(&self, path: &Path) -> Option<FileFingerprint> {
        self.state.read().files.get(path).cloned()
    }

    pub fn remove_file(&self, path: &Path) -> Option<FileFingerprint> {
        self.state.write().files.remove(path)
    }

    /// Decide whether `path` needs backing up again.
    ///
    /// Missing files and files without a fingerprint count as changed.
    /// Otherwise only size and mtime are compared; the checksum is not
    /// recomputed. Stat errors other than "not found" are returned.
    pub fn has_changed(&self, path: &Path) -> Result<bool> {
        let Some(stat) = FileStat::try_from_path(path)? else {
            debug!("{} no longer exists", path.display());
            return Ok(true);
        };

        let state = self.state.read();
        let changed = match state.files.get(path) {
            Some(fingerprint) => !fingerprint.matches(&stat),
            None => true,
        };

        Ok(changed)
    }

    /// Filter `paths` down to the ones that changed.
    ///
    /// Paths that cannot be stat'd for reasons other than non-existence are
    /// left out of the result rather than failing the scan.
    pub fn get_changed_files(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        let mut changed = Vec::new();

        for path in paths {
            match self.has_changed(path) {
                Ok(true) => changed.push(path.clone()),
                Ok(false) => {}
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }

        debug!("{} of {} candidates changed", changed.len(), paths.len());
        changed
    }

    /// Compute a fresh fingerprint for `path` tagged with `backup_name`.
    pub fn create_fingerprint(path: &Path, backup_name: &str) -> Result<FileFingerprint> {
        Ok(FileFingerprint::capture(path, backup_name)?)
    }

    /// Record a full backup. Also advances the last-backup timestamp.
    pub fn mark_full_backup(&self, timestamp: DateTime<Utc>, name: &str) {
        let mut state = self.state.write();
        state.last_full_backup = Some(timestamp);
        state.last_full_backup_name = name.to_string();
        state.last_backup = Some(timestamp);
    }

    /// Record an incremental backup. Full-backup fields are untouched.
    pub fn mark_incremental_backup(&self, timestamp: DateTime<Utc>) {
        let mut state = self.state.write();
        // last_backup never falls behind last_full_backup
        let timestamp = match state.last_full_backup {
            Some(full) if full > timestamp => full,
            _ => timestamp,
        };
        state.last_backup = Some(timestamp);
    }

    /// True when no full backup exists or the last one is at least `interval` old.
    pub fn need_full_backup(&self, interval: Duration) -> bool {
        self.need_full_backup_at(Utc::now(), interval)
    }

    /// [`need_full_backup`](Self::need_full_backup) against an explicit clock.
    pub fn need_full_backup_at(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        match self.state.read().last_full_backup {
            Some(last_full) => now.signed_duration_since(last_full) >= interval,
            None => true,
        }
    }

    /// Re-fingerprint one path as captured by `backup_name`.
    ///
    /// A path that no longer exists loses its fingerprint. Anything else that
    /// cannot be fingerprinted (unreadable, not UTF-8) is skipped.
    pub fn refresh(&self, path: &Path, backup_name: &str) -> PathUpdate {
        match FileFingerprint::capture(path, backup_name) {
            Ok(fingerprint) => {
                let size = fingerprint.size;
                match self.add_file(path, fingerprint) {
                    Ok(()) => PathUpdate::Updated(size),
                    Err(e) => {
                        warn!("Cannot index {}: {}", path.display(), e);
                        PathUpdate::Skipped
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.remove_file(path).is_some() {
                    debug!("Dropped fingerprint of vanished {}", path.display());
                    PathUpdate::Removed
                } else {
                    warn!("Cannot fingerprint {}: {}", path.display(), e);
                    PathUpdate::Skipped
                }
            }
            Err(e) => {
                warn!("Cannot fingerprint {}: {}", path.display(), e);
                PathUpdate::Skipped
            }
        }
    }

    /// Re-fingerprint `paths` as captured by `backup_name`.
    pub fn update_from_backup(&self, backup_name: &str, paths: &[PathBuf]) -> UpdateOutcome {
        let mut outcome = UpdateOutcome::default();

        for path in paths {
            outcome.record(self.refresh(path, backup_name));
        }

        info!(
            "Updated {} of {} fingerprints for backup {} ({} removed, {} skipped)",
            outcome.updated,
            paths.len(),
            backup_name,
            outcome.removed,
            outcome.skipped
        );
        outcome
    }

    /// Indexed paths below any of `roots` that no longer exist.
    pub fn vanished_files(&self, roots: &[PathBuf]) -> Vec<PathBuf> {
        let known: Vec<PathBuf> = self
            .state
            .read()
            .files
            .keys()
            .filter(|path| roots.iter().any(|root| path.starts_with(root)))
            .cloned()
            .collect();

        known
            .into_iter()
            .filter(|path| matches!(FileStat::try_from_path(path), Ok(None)))
            .collect()
    }

    pub fn file_count(&self) -> usize {
        self.state.read().files.len()
    }

    pub fn total_size(&self) -> u64 {
        self.state.read().files.values().map(|f| f.size).sum()
    }

    /// Paths whose latest fingerprint was captured by `backup_name`.
    pub fn backuped_files(&self, backup_name: &str) -> Vec<PathBuf> {
        self.state
            .read()
            .files
            .values()
            .filter(|f| f.backuped_in == backup_name)
            .map(|f| f.path.clone())
            .collect()
    }

    /// Name of the last full backup, if one was recorded.
    pub fn last_full_backup_name(&self) -> Option<String> {
        let state = self.state.read();
        (!state.last_full_backup_name.is_empty()).then(|| state.last_full_backup_name.clone())
    }

    pub fn last_full_backup(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_full_backup
    }

    pub fn last_backup(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_backup
    }

    /// Whether `backup_name` is known to the index, either as the last full
    /// backup or as the capturing run of at least one fingerprint.
    pub fn knows_backup(&self, backup_name: &str) -> bool {
        if backup_name.is_empty() {
            return false;
        }
        let state = self.state.read();
        state.last_full_backup_name == backup_name
            || state.files.values().any(|f| f.backuped_in == backup_name)
    }
}
