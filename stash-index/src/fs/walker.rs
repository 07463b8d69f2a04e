//! Candidate collection for change detection.
//!
//! Expands the configured roots into the flat list of file paths that the
//! index checks for changes.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Maximum depth (None = unlimited)
    pub max_depth: Option<usize>,

    /// Exclude patterns, matched against each path component's file name
    pub exclude_patterns: Vec<String>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            follow_links: false,
            max_depth: None,
            exclude_patterns: vec![
                ".git".to_string(),
                "node_modules".to_string(),
                ".DS_Store".to_string(),
            ],
        }
    }
}

impl WalkOptions {
    pub fn with_excludes(exclude_patterns: Vec<String>) -> Self {
        Self {
            exclude_patterns,
            ..Self::default()
        }
    }
}

/// Walk a directory tree and collect every regular file below it.
pub fn walk_directory(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    let mut walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name();

    if let Some(max_depth) = options.max_depth {
        walker = walker.max_depth(max_depth);
    }

    let entries = walker
        .into_iter()
        .filter_entry(|entry| !should_exclude(entry, &options.exclude_patterns));

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                // The root itself must be readable; anything below is best-effort.
                if e.depth() == 0 {
                    return Err(e.into());
                }
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        if entry.file_type().is_dir() {
            continue;
        }

        files.push(entry.into_path());
    }

    Ok(files)
}

/// Expand a mixed list of files and directories into candidate file paths.
///
/// Plain files pass through unchanged. Roots that no longer exist also pass
/// through so the index reports them as changed.
pub fn collect_candidates(roots: &[PathBuf], options: &WalkOptions) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    for root in roots {
        if !root.is_dir() {
            candidates.push(root.clone());
            continue;
        }

        match walk_directory(root, options) {
            Ok(files) => {
                debug!("Collected {} files under {}", files.len(), root.display());
                candidates.extend(files);
            }
            Err(e) => warn!("Failed to walk {}: {}", root.display(), e),
        }
    }

    candidates
}

/// Check if a directory entry should be excluded based on patterns
fn should_exclude(entry: &DirEntry, patterns: &[String]) -> bool {
    // Never exclude the root the caller asked for.
    if entry.depth() == 0 {
        return false;
    }

    let file_name = entry.file_name().to_string_lossy();
    patterns.iter().any(|pattern| file_name == pattern.as_str())
}
