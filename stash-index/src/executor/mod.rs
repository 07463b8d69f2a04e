//! Parallel fingerprinting.
//!
//! Fingerprinting is dominated by stat and hashing, so work is fanned out to
//! the blocking pool with at most `workers` files in flight. Both the index
//! and the manifest are shared between the tasks; each task only holds their
//! locks for its own insert.

use crate::config::Config;
use crate::index::FingerprintIndex;
use crate::metadata::{CategoryTiming, FileInfo, Metadata};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub use crate::index::{PathUpdate, UpdateOutcome};

/// Result of capturing one category into a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOutcome {
    pub category: String,
    pub captured: usize,
    pub failed: usize,
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Bounded fan-out of fingerprinting work
#[derive(Debug, Clone)]
pub struct FingerprintExecutor {
    workers: usize,
}

impl FingerprintExecutor {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.performance.fingerprint_workers)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Fingerprint `paths` as captured by `backup_name` and upsert them.
    ///
    /// Vanished paths lose their fingerprint and count as removed; other
    /// failures count as skipped.
    pub async fn update_index(
        &self,
        index: Arc<FingerprintIndex>,
        backup_name: &str,
        paths: Vec<PathBuf>,
    ) -> UpdateOutcome {
        let total = paths.len();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        info!(
            "Fingerprinting {} files for {} ({} workers)",
            total, backup_name, self.workers
        );

        for path in paths {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let index = Arc::clone(&index);
            let backup_name = backup_name.to_string();

            tasks.spawn_blocking(move || {
                let _permit = permit;
                index.refresh(&path, &backup_name)
            });
        }

        let mut outcome = UpdateOutcome::default();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(update) => outcome.record(update),
                Err(e) => {
                    warn!("Fingerprint task failed: {}", e);
                    outcome.record(PathUpdate::Skipped);
                }
            }
        }

        info!(
            "Fingerprinted {} of {} files ({} removed, {} skipped)",
            outcome.updated, total, outcome.removed, outcome.skipped
        );
        outcome
    }

    /// Capture `(original, backup_path)` pairs of one category into `metadata`
    /// and record the category's timing.
    pub async fn capture_category(
        &self,
        metadata: Arc<Metadata>,
        category: &str,
        entries: Vec<(PathBuf, PathBuf)>,
    ) -> CaptureOutcome {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for (original, backup_path) in entries {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let metadata = Arc::clone(&metadata);

            tasks.spawn_blocking(move || {
                let _permit = permit;
                match FileInfo::capture(&original, &backup_path) {
                    Ok(info) => {
                        let size = info.counted_size();
                        let is_dir = info.is_dir;
                        metadata.add_file_info(info);
                        Some((size, is_dir))
                    }
                    Err(e) => {
                        warn!("Cannot capture {}: {}", original.display(), e);
                        None
                    }
                }
            });
        }

        let mut captured = 0;
        let mut failed = 0;
        let mut files = 0;
        let mut bytes = 0;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Some((size, is_dir))) => {
                    captured += 1;
                    if !is_dir {
                        files += 1;
                    }
                    bytes += size;
                }
                Ok(None) => failed += 1,
                Err(e) => {
                    warn!("Capture task failed: {}", e);
                    failed += 1;
                }
            }
        }

        let elapsed = start.elapsed();
        metadata.add_category_timing(CategoryTiming {
            name: category.to_string(),
            file_count: files,
            total_size: bytes,
            duration: elapsed,
        });

        debug!(
            "Captured category {}: {} entries, {} bytes in {:?}",
            category, captured, bytes, elapsed
        );

        CaptureOutcome {
            category: category.to_string(),
            captured,
            failed,
            bytes,
            elapsed,
        }
    }
}
