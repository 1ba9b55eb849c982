//! Snapshot storage implementation.

use crate::{SnapshotError, SnapshotResult};
use docvault_util::path::{is_within, normalize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Storage for snapshot files.
///
/// Snapshots are stored as plain file copies, one directory per document:
/// ```text
/// root/
///   <document_id>/
///     000001.txt
///     000002.txt
/// ```
///
/// The store also performs the raw file operations the engine needs on
/// working copies (copying a snapshot back over a working file, probing
/// whether a working file still exists). Every failure carries the path it
/// was operating on. Nothing is rolled back on failure.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Create a snapshot store rooted at `root`, creating the directory.
    pub async fn new(root: impl Into<PathBuf>) -> SnapshotResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| SnapshotError::io(&root, e))?;
        Ok(Self { root })
    }

    /// Root directory holding all snapshots.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` lies inside the snapshot root.
    pub fn owns(&self, path: &Path) -> bool {
        is_within(path, &self.root)
    }

    /// Deterministic location of a document's snapshot.
    ///
    /// Names depend only on the document id and the version ordinal, so a
    /// document rename never changes where its next snapshot goes. The
    /// working file's extension is kept so snapshots open with the right
    /// application.
    pub fn snapshot_path(&self, document_id: &str, ordinal: u64, working_path: &Path) -> PathBuf {
        let mut name = format!("{ordinal:06}");
        if let Some(ext) = working_path.extension() {
            name.push('.');
            name.push_str(&ext.to_string_lossy());
        }
        self.document_dir(document_id).join(name)
    }

    /// Directory holding one document's snapshots.
    pub fn document_dir(&self, document_id: &str) -> PathBuf {
        self.root.join(document_id)
    }

    /// Write `content` to `path`, creating parent directories.
    pub async fn save(&self, path: &Path, content: &[u8]) -> SnapshotResult<()> {
        ensure_parent(path).await?;
        fs::write(path, content)
            .await
            .map_err(|e| SnapshotError::io(path, e))
    }

    /// Read a file fully.
    pub async fn read(&self, path: &Path) -> SnapshotResult<Vec<u8>> {
        fs::read(path).await.map_err(|e| SnapshotError::io(path, e))
    }

    /// Read a file as text, replacing invalid UTF-8.
    pub async fn read_text(&self, path: &Path) -> SnapshotResult<String> {
        crate::diff::read_text(path).await
    }

    /// Delete a file. A missing file is an error; see [`Self::remove_if_exists`].
    pub async fn delete(&self, path: &Path) -> SnapshotResult<()> {
        fs::remove_file(path)
            .await
            .map_err(|e| SnapshotError::io(path, e))?;
        debug!(path = %path.display(), "Deleted snapshot file");
        Ok(())
    }

    /// Delete a file if present. Returns whether a file was removed.
    pub async fn remove_if_exists(&self, path: &Path) -> SnapshotResult<bool> {
        match self.delete(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Whether a file exists at `path`.
    pub async fn exists(&self, path: &Path) -> SnapshotResult<bool> {
        fs::try_exists(path)
            .await
            .map_err(|e| SnapshotError::io(path, e))
    }

    /// Copy `src` to `dst`, overwriting `dst` if present.
    ///
    /// Parent directories of `dst` are created. Copying a file onto itself is
    /// a no-op so a retry can never truncate the source.
    pub async fn copy(&self, src: &Path, dst: &Path) -> SnapshotResult<u64> {
        if normalize(src) == normalize(dst) {
            return Ok(0);
        }
        ensure_parent(dst).await?;

        let bytes = fs::copy(src, dst).await.map_err(|e| {
            // Blame the source when it is the side that is missing
            if e.kind() == std::io::ErrorKind::NotFound && !src.exists() {
                SnapshotError::io(src, e)
            } else {
                SnapshotError::io(dst, e)
            }
        })?;

        debug!(src = %src.display(), dst = %dst.display(), bytes, "Copied file");
        Ok(bytes)
    }

    /// Remove a document's snapshot directory if it is empty.
    pub async fn prune_document_dir(&self, document_id: &str) -> SnapshotResult<()> {
        let dir = self.document_dir(document_id);
        match fs::remove_dir(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            // Still holds files (e.g. an orphaned snapshot); leave it for cleanup
            Err(_) if dir.exists() => Ok(()),
            Err(e) => Err(SnapshotError::io(&dir, e)),
        }
    }
}

async fn ensure_parent(path: &Path) -> SnapshotResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| SnapshotError::io(parent, e))?;
    }
    Ok(())
}
