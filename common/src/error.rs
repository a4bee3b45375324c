//! Error taxonomy shared by the comparator, pruner and replication task.
//!
//! Only [`ConfigurationError`] ever reaches the caller of a replication task. A
//! [`FilesystemError`] is produced by the tree helpers and downgraded to a warning at
//! every call site inside the task.

use std::path::PathBuf;

/// Fatal problems detected before any copy job is launched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// every configured destination was empty or missing
    #[error("need at least one destination to copy to")]
    NoDestinations,
    /// the excluded-file suffix does not compile into a glob
    #[error("invalid exclusion pattern {pattern:?}")]
    InvalidExclusion {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

/// A filesystem operation failed on a specific path.
#[derive(Debug, thiserror::Error)]
#[error("failed {operation} {path:?}")]
pub struct FilesystemError {
    pub operation: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl FilesystemError {
    #[must_use]
    pub fn new(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Whether the failure was caused by the path not existing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.source.kind() == std::io::ErrorKind::NotFound
    }
}
