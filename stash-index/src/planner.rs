//! Full/incremental backup planning.
//!
//! Combines the index's cadence decision with change detection to decide
//! what the next run captures, and links incremental runs to their base.

use crate::index::FingerprintIndex;
use crate::metadata::{BackupType, Metadata};
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use tracing::{info, warn};

/// What the next backup run should capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPlan {
    pub backup_type: BackupType,

    /// Full backup an incremental run extends
    pub base_backup: Option<String>,

    /// Paths to hand to the archive writer
    pub files: Vec<PathBuf>,

    /// Number of candidates considered
    pub candidates: usize,
}

impl BackupPlan {
    /// Plan against the current time.
    pub fn build(index: &FingerprintIndex, candidates: &[PathBuf], interval: Duration) -> Self {
        Self::build_at(index, candidates, interval, Utc::now())
    }

    /// Plan against an explicit clock.
    ///
    /// A full backup is chosen when one is due or when the recorded base
    /// cannot be resolved; otherwise only changed candidates are selected.
    pub fn build_at(
        index: &FingerprintIndex,
        candidates: &[PathBuf],
        interval: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let base = index.last_full_backup_name();

        let incremental_base = if index.need_full_backup_at(now, interval) {
            None
        } else {
            match base {
                Some(name) if verify_base_backup(index, &name) => Some(name),
                Some(_) => None,
                None => {
                    warn!("Last full backup has no name, scheduling a full backup");
                    None
                }
            }
        };

        let plan = match incremental_base {
            Some(base) => Self {
                backup_type: BackupType::Incremental,
                base_backup: Some(base),
                files: index.get_changed_files(candidates),
                candidates: candidates.len(),
            },
            None => Self {
                backup_type: BackupType::Full,
                base_backup: None,
                files: candidates.to_vec(),
                candidates: candidates.len(),
            },
        };

        info!(
            "Planned {} backup: {} of {} candidates",
            plan.backup_type,
            plan.files.len(),
            plan.candidates
        );
        plan
    }

    pub fn is_incremental(&self) -> bool {
        self.backup_type == BackupType::Incremental
    }

    /// Record type, base and scope in the run's manifest.
    pub fn apply_to(&self, metadata: &Metadata) {
        metadata.set_backup_type(self.backup_type);
        if let Some(base) = &self.base_backup {
            metadata.set_base_backup(base);
        }
        metadata.set_changed_files_only(self.is_incremental());
    }

    /// Mark the index once the run named `backup_name` has completed.
    pub fn commit(&self, index: &FingerprintIndex, backup_name: &str, timestamp: DateTime<Utc>) {
        match self.backup_type {
            BackupType::Full => index.mark_full_backup(timestamp, backup_name),
            BackupType::Incremental => index.mark_incremental_backup(timestamp),
        }
    }
}

/// Check that `base` names a backup the index knows about.
///
/// A dangling base is logged and reported as `false`; it is never an error.
pub fn verify_base_backup(index: &FingerprintIndex, base: &str) -> bool {
    if index.knows_backup(base) {
        return true;
    }
    warn!("Base backup {:?} is unknown to the index", base);
    false
}

/// Check a manifest's lineage: full manifests always pass, incremental ones
/// need a base the index knows.
pub fn verify_manifest_base(index: &FingerprintIndex, metadata: &Metadata) -> bool {
    if !metadata.is_incremental() {
        return true;
    }
    match metadata.base_backup() {
        Some(base) => verify_base_backup(index, &base),
        None => {
            warn!("Incremental manifest has no base backup");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::walker::{collect_candidates, WalkOptions};
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("old.txt");
        let new = dir.path().join("new.txt");
        fs::write(&old, b"old").unwrap();
        fs::write(&new, b"new").unwrap();
        (dir, old, new)
    }

    #[test]
    fn test_fresh_index_plans_full() {
        let (_dir, old, new) = setup();
        let index = FingerprintIndex::new();

        let plan = BackupPlan::build(&index, &[old.clone(), new.clone()], Duration::days(7));
        assert_eq!(plan.backup_type, BackupType::Full);
        assert!(plan.base_backup.is_none());
        assert_eq!(plan.files, vec![old, new]);
    }

    #[test]
    fn test_recent_full_plans_incremental() {
        let (_dir, old, new) = setup();
        let index = FingerprintIndex::new();
        index.update_from_backup("full-1", &[old.clone()]);
        index.mark_full_backup(Utc::now(), "full-1");

        let plan = BackupPlan::build(&index, &[old, new.clone()], Duration::days(7));
        assert!(plan.is_incremental());
        assert_eq!(plan.base_backup.as_deref(), Some("full-1"));
        assert_eq!(plan.files, vec![new]);
        assert_eq!(plan.candidates, 2);
    }

    #[test]
    fn test_overdue_full_plans_full() {
        let (_dir, old, _new) = setup();
        let index = FingerprintIndex::new();
        let then = Utc::now() - Duration::days(10);
        index.mark_full_backup(then, "full-1");

        let plan = BackupPlan::build(&index, &[old], Duration::days(7));
        assert_eq!(plan.backup_type, BackupType::Full);
    }

    #[test]
    fn test_unnamed_full_falls_back_to_full() {
        let (_dir, old, _new) = setup();
        let index = FingerprintIndex::new();
        index.mark_full_backup(Utc::now(), "");

        let plan = BackupPlan::build(&index, &[old], Duration::days(7));
        assert_eq!(plan.backup_type, BackupType::Full);
    }

    #[test]
    fn test_apply_and_commit() {
        let (_dir, old, new) = setup();
        let index = FingerprintIndex::new();
        let full_at = Utc::now();
        index.mark_full_backup(full_at, "full-1");

        let plan = BackupPlan::build(&index, &[old, new], Duration::days(7));
        let metadata = Metadata::with_identity("h", "u");
        plan.apply_to(&metadata);

        assert!(metadata.is_incremental());
        assert_eq!(metadata.base_backup().as_deref(), Some("full-1"));
        assert!(metadata.snapshot().changed_files_only);
        assert!(verify_manifest_base(&index, &metadata));

        let inc_at = full_at + Duration::hours(1);
        plan.commit(&index, "inc-1", inc_at);
        assert_eq!(index.last_full_backup(), Some(full_at));
        assert_eq!(index.last_backup(), Some(inc_at));
        assert_eq!(index.last_full_backup_name().as_deref(), Some("full-1"));
    }

    #[test]
    fn test_deleted_file_leaves_index_and_plan() {
        let (dir, old, new) = setup();
        let roots = vec![dir.path().to_path_buf()];
        let options = WalkOptions::default();
        let index = FingerprintIndex::new();

        let full = BackupPlan::build(&index, &collect_candidates(&roots, &options), Duration::days(7));
        index.update_from_backup("full-1", &full.files);
        full.commit(&index, "full-1", Utc::now());
        assert_eq!(index.file_count(), 2);

        fs::remove_file(&old).unwrap();
        fs::write(&new, b"newer").unwrap();

        let inc = BackupPlan::build(&index, &collect_candidates(&roots, &options), Duration::days(7));
        assert!(inc.is_incremental());
        assert_eq!(inc.files, vec![new.clone()]);

        let mut refresh = inc.files.clone();
        refresh.extend(index.vanished_files(&roots));
        let outcome = index.update_from_backup("inc-1", &refresh);
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.removed, 1);
        assert_eq!(index.file_count(), 1);
        assert!(index.get_file(&old).is_none());

        let next = BackupPlan::build(&index, &collect_candidates(&roots, &options), Duration::days(7));
        assert!(next.files.is_empty());
        assert_eq!(next.candidates, 1);
    }

    #[test]
    fn test_dangling_manifest_base() {
        let index = FingerprintIndex::new();
        let metadata = Metadata::with_identity("h", "u");
        assert!(verify_manifest_base(&index, &metadata));

        metadata.set_backup_type(BackupType::Incremental);
        assert!(!verify_manifest_base(&index, &metadata));

        metadata.set_base_backup("ghost");
        assert!(!verify_manifest_base(&index, &metadata));
    }
}
