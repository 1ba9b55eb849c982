//! Error types for the version control engine.

use docvault_snapshot::SnapshotError;
use docvault_storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine, ledger and reconciler operations.
pub type VcResult<T> = Result<T, VcError>;

/// Every failure the engine can report.
#[derive(Debug, Error)]
pub enum VcError {
    /// No version with this id exists (or it belongs to another document).
    #[error("version not found: {0}")]
    VersionNotFound(String),

    /// No document with this id exists.
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// A file needed for a comparison or switch could not be read.
    #[error("snapshot unreadable: {}", path.display())]
    SnapshotUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A copy, read or delete failed at the storage layer.
    #[error("io failure on {}: {source}", path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot bytes were written but the version row was not. The file
    /// at `path` is referenced by nothing.
    #[error("orphaned snapshot {} for document {document}: {source}", path.display())]
    OrphanedSnapshot {
        document: String,
        path: PathBuf,
        #[source]
        source: Box<VcError>,
    },

    /// The metadata store failed.
    #[error("metadata store error: {0}")]
    Metadata(#[from] StorageError),

    /// The file is already tracked.
    #[error("{} is already tracked as {document}", path.display())]
    AlreadyTracked { path: PathBuf, document: String },

    /// The path cannot be tracked.
    #[error("cannot track {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// Invalid configuration.
    #[error("invalid config at {path}: {message}")]
    Config { path: String, message: String },

    /// The OS file watcher could not be set up.
    #[error("file watcher error: {0}")]
    Watch(String),
}

impl VcError {
    /// Create an IO failure for a path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoFailure {
            path: path.into(),
            source,
        }
    }

    /// Whether this is a not-found error for a document or version.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::VersionNotFound(_) | Self::DocumentNotFound(_))
    }
}

impl From<SnapshotError> for VcError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::Io { path, source } => Self::IoFailure { path, source },
            SnapshotError::Unreadable { path, source } => Self::SnapshotUnreadable { path, source },
        }
    }
}

impl From<notify::Error> for VcError {
    fn from(err: notify::Error) -> Self {
        Self::Watch(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_errors_keep_their_kind() {
        let io = SnapshotError::io(
            "/x",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        assert!(matches!(VcError::from(io), VcError::IoFailure { .. }));

        let unreadable = SnapshotError::unreadable(
            "/y",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(
            VcError::from(unreadable),
            VcError::SnapshotUnreadable { .. }
        ));
    }

    #[test]
    fn orphaned_snapshot_names_file_and_cause() {
        let err = VcError::OrphanedSnapshot {
            document: "doc_1".to_string(),
            path: PathBuf::from("/s/doc_1/000002.txt"),
            source: Box::new(VcError::Metadata(StorageError::LockPoisoned(
                "poisoned".to_string(),
            ))),
        };
        let message = err.to_string();
        assert!(message.contains("/s/doc_1/000002.txt"));
        assert!(message.contains("doc_1"));
    }

    #[test]
    fn not_found_kinds() {
        assert!(VcError::VersionNotFound("v".into()).is_not_found());
        assert!(VcError::DocumentNotFound("d".into()).is_not_found());
        assert!(!VcError::Watch("x".into()).is_not_found());
    }
}
