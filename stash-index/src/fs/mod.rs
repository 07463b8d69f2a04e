//! Filesystem helpers: stat, checksums and candidate walking.

pub mod checksum;
pub mod metadata;
pub mod walker;

pub use metadata::FileStat;
