//! Custom error types for the stash index.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StashError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Manifest not found: {0}")]
    ManifestNotFound(String),

    #[error("Path is not valid UTF-8: {0}")]
    InvalidPath(String),

    #[error("Invalid backup type: {0}")]
    InvalidBackupType(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StashError {
    /// True when the underlying cause is a missing file.
    pub fn is_not_found(&self) -> bool {
        match self {
            StashError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            StashError::ManifestNotFound(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StashError>;
