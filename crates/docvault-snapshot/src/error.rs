//! Snapshot error types.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Errors that can occur during snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// A copy, read, write or delete failed at the file system level.
    #[error("IO failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file needed for comparison could not be read.
    #[error("Snapshot unreadable: {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SnapshotError {
    /// Create an IO error for a path.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create an unreadable error for a path.
    pub fn unreadable(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Unreadable {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// The path the failed operation was working on.
    pub fn path(&self) -> &Path {
        match self {
            Self::Io { path, .. } | Self::Unreadable { path, .. } => path,
        }
    }

    /// Whether the underlying cause is a missing file.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Io { source, .. } | Self::Unreadable { source, .. } => {
                source.kind() == std::io::ErrorKind::NotFound
            }
        }
    }
}
