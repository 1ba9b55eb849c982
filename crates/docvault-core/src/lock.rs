//! Per-document mutual exclusion.
//!
//! Every operation that reads and then writes a document's metadata or
//! files holds that document's lock for its whole duration. Operations on
//! different documents never contend.
//!
//! A lock has two layers. An async mutex orders tasks inside one process;
//! with a lock directory configured, an exclusive OS file lock on
//! `<lock_dir>/<key>.lock` then orders processes sharing a storage root,
//! e.g. `docvault watch` and a concurrent `docvault commit`.

use crate::{VcError, VcResult};
use fs4::fs_std::FileExt;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// Table of per-document locks.
///
/// Entries are weak, so a document's lock is freed once nobody holds or
/// waits on it. Lock files are never removed: a waiter may already have one
/// open, and a fresh file at the same path would not exclude it.
#[derive(Debug, Clone, Default)]
pub struct DocumentLocks {
    table: Arc<Mutex<HashMap<String, Weak<AsyncMutex<()>>>>>,
    lock_dir: Option<PathBuf>,
}

/// Proof that the holder has exclusive access to one document.
///
/// Internal steps that must run under the lock take `&DocumentGuard`
/// instead of locking again, so a locked operation can call another one
/// without deadlocking on itself.
#[derive(Debug)]
pub struct DocumentGuard {
    document_id: String,
    // Closing the file releases the OS lock
    _file: Option<File>,
    _guard: OwnedMutexGuard<()>,
}

impl DocumentGuard {
    /// The document this guard locks.
    pub fn document_id(&self) -> &str {
        &self.document_id
    }
}

impl DocumentLocks {
    /// Locks that only exclude tasks within this process.
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks that also exclude other processes using the same `lock_dir`.
    pub fn with_lock_dir(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            table: Arc::default(),
            lock_dir: Some(lock_dir.into()),
        }
    }

    /// Directory holding the lock files, if locks are shared across processes.
    pub fn lock_dir(&self) -> Option<&Path> {
        self.lock_dir.as_deref()
    }

    /// Wait for exclusive access to a document.
    pub async fn lock(&self, document_id: &str) -> VcResult<DocumentGuard> {
        let guard = self.handle(document_id).lock_owned().await;

        let file = match &self.lock_dir {
            Some(dir) => Some(lock_file(dir.join(format!("{document_id}.lock"))).await?),
            None => None,
        };

        trace!(document = %document_id, "Acquired document lock");
        Ok(DocumentGuard {
            document_id: document_id.to_string(),
            _file: file,
            _guard: guard,
        })
    }

    /// Number of documents whose lock is currently held or awaited in this
    /// process.
    pub fn active(&self) -> usize {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.values().filter(|w| w.strong_count() > 0).count()
    }

    fn handle(&self, document_id: &str) -> Arc<AsyncMutex<()>> {
        // Holds only weak pointers, so a poisoned table is still consistent
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.retain(|_, weak| weak.strong_count() > 0);

        if let Some(existing) = table.get(document_id).and_then(Weak::upgrade) {
            return existing;
        }

        let mutex = Arc::new(AsyncMutex::new(()));
        table.insert(document_id.to_string(), Arc::downgrade(&mutex));
        mutex
    }
}

/// Open `path` and block on an exclusive lock off the async runtime.
async fn lock_file(path: PathBuf) -> VcResult<File> {
    let target = path.clone();
    match tokio::task::spawn_blocking(move || open_locked(&target)).await {
        Ok(Ok(file)) => Ok(file),
        Ok(Err(e)) => Err(VcError::io(path, e)),
        Err(e) => Err(VcError::io(path, std::io::Error::other(e))),
    }
}

fn open_locked(path: &Path) -> std::io::Result<File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;
    file.lock_exclusive()?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    const BLOCKED: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn same_document_is_exclusive() {
        let locks = DocumentLocks::new();
        let guard = locks.lock("doc_a").await.unwrap();
        assert_eq!(guard.document_id(), "doc_a");
        assert!(timeout(BLOCKED, locks.lock("doc_a")).await.is_err());

        drop(guard);
        assert!(timeout(BLOCKED, locks.lock("doc_a")).await.is_ok());
    }

    #[tokio::test]
    async fn different_documents_do_not_block() {
        let locks = DocumentLocks::new();
        let _a = locks.lock("doc_a").await.unwrap();
        assert!(timeout(BLOCKED, locks.lock("doc_b")).await.is_ok());
    }

    #[tokio::test]
    async fn released_locks_are_pruned() {
        let locks = DocumentLocks::new();
        {
            let _a = locks.lock("doc_a").await.unwrap();
            let _b = locks.lock("doc_b").await.unwrap();
            assert_eq!(locks.active(), 2);
        }
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn critical_sections_do_not_interleave() {
        let dir = TempDir::new().unwrap();
        let locks = DocumentLocks::with_lock_dir(dir.path().join("locks"));
        let inside = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();

        for _ in 0..8 {
            let locks = locks.clone();
            let inside = Arc::clone(&inside);
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock("doc_shared").await.unwrap();
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn separate_tables_sharing_a_lock_dir_exclude_each_other() {
        let dir = TempDir::new().unwrap();
        let first = DocumentLocks::with_lock_dir(dir.path().join("locks"));
        let second = DocumentLocks::with_lock_dir(dir.path().join("locks"));

        let held = first.lock("doc_a").await.unwrap();
        assert!(dir.path().join("locks/doc_a.lock").exists());
        assert!(timeout(BLOCKED, second.lock("doc_a")).await.is_err());
        assert!(timeout(BLOCKED, second.lock("doc_b")).await.is_ok());

        drop(held);
        let reacquired = timeout(Duration::from_secs(5), second.lock("doc_a")).await;
        assert!(matches!(reacquired, Ok(Ok(_))));
    }
}
