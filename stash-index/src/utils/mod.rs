//! Utility modules for the stash index.

pub mod errors;
pub mod format;
pub mod logger;

pub use errors::{Result, StashError};
