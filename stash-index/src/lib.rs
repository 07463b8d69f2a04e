//! Stash Index Library
//!
//! Change tracking for the stash backup tool: a persistent fingerprint index
//! that decides which files changed since they were last backed up, and the
//! per-backup metadata manifest that records what each run captured.

pub mod config;
pub mod executor;
pub mod fs;
pub mod index;
pub mod metadata;
pub mod planner;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use index::{FileFingerprint, FingerprintIndex};
pub use metadata::{BackupType, CategoryTiming, FileInfo, Metadata};
pub use planner::BackupPlan;
pub use utils::errors::StashError;
pub type Result<T> = std::result::Result<T, StashError>;
