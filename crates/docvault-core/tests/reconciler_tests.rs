//! Reconciler integration tests.
//!
//! Most tests feed [`WatchEvent`]s directly so they do not depend on OS
//! event timing; one test runs the real watcher end-to-end.

use docvault_core::{
    Config, CreateOutcome, Document, DocumentLocks, FileWatcher, Reconciled, Reconciler, VcError,
    Version, VersionControl, WatchEvent,
};
use docvault_storage::{json::metadata_storage, JsonStorage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::fs;
use tokio_util::sync::CancellationToken;

type Engine = VersionControl<JsonStorage>;

async fn open(dir: &TempDir) -> Engine {
    let config = Config {
        settle_delay_ms: Some(20),
        ..Config::with_storage_root(dir.path().join("store"))
    };
    let storage = metadata_storage(&config.storage_root());
    VersionControl::new(config, storage)
        .await
        .expect("Failed to open engine")
}

async fn track_with_versions(engine: &Engine, path: &Path, count: usize) -> (Document, Vec<Version>) {
    fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    fs::write(path, "0").await.unwrap();
    let document = engine.track_document(path).await.unwrap();

    let mut versions = Vec::new();
    for i in 0..count {
        fs::write(path, format!("content {i}")).await.unwrap();
        match engine.create_new_version(&document.id, None).await.unwrap() {
            CreateOutcome::Created(version) => versions.push(version),
            CreateOutcome::NoChange => panic!("expected a version"),
        }
    }
    (document, versions)
}

/// Test that a rename keeps the document's identity and versions.
#[tokio::test]
async fn test_rename_event_moves_document() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(open(&dir).await);
    let old = dir.path().join("work/report.txt");
    let (document, versions) = track_with_versions(&engine, &old, 2).await;

    let new = dir.path().join("work/final.txt");
    fs::rename(&old, &new).await.unwrap();

    let reconciler = Reconciler::detached(Arc::clone(&engine));
    let result = reconciler
        .handle_event(WatchEvent::Renamed {
            old: old.clone(),
            new: new.clone(),
        })
        .await
        .unwrap();

    let Reconciled::Moved(moved) = result else {
        panic!("expected the document to move, got {result:?}");
    };
    assert_eq!(moved.id, document.id);
    assert_eq!(moved.name, "final.txt");
    assert_eq!(moved.working_path, new);

    let after = engine.get_versions_by_document(&document.id).await.unwrap();
    let mut before = versions.clone();
    before.reverse();
    assert_eq!(after, before);
    assert_eq!(
        engine.get_document(&document.id).await.unwrap().version_count,
        2
    );
}

/// Test that a delete removes the document and all its versions.
#[tokio::test]
async fn test_delete_event_removes_document() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(open(&dir).await);
    let path = dir.path().join("work/notes.md");
    let (document, versions) = track_with_versions(&engine, &path, 3).await;

    fs::remove_file(&path).await.unwrap();
    let reconciler = Reconciler::detached(Arc::clone(&engine));
    let result = reconciler
        .handle_event(WatchEvent::Deleted { path: path.clone() })
        .await
        .unwrap();

    assert!(matches!(result, Reconciled::Removed(ref d) if d.id == document.id));
    assert!(matches!(
        engine.get_document(&document.id).await,
        Err(VcError::DocumentNotFound(_))
    ));
    for version in &versions {
        assert!(!version.snapshot_path.exists());
        assert!(engine.get_version(&version.id).await.is_err());
    }
}

/// Test that events for unknown paths are no-ops.
#[tokio::test]
async fn test_unknown_paths_are_ignored() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(open(&dir).await);
    let reconciler = Reconciler::detached(Arc::clone(&engine));

    let gone = dir.path().join("never-tracked.txt");
    let result = reconciler
        .handle_event(WatchEvent::Deleted { path: gone.clone() })
        .await
        .unwrap();
    assert_eq!(result, Reconciled::Ignored);

    let target = dir.path().join("elsewhere.txt");
    fs::write(&target, "x").await.unwrap();
    let result = reconciler
        .handle_event(WatchEvent::Renamed {
            old: gone,
            new: target,
        })
        .await
        .unwrap();
    assert_eq!(result, Reconciled::Ignored);
}

/// Test that a file moved into the storage directory keeps its document.
#[tokio::test]
async fn test_rename_into_storage_is_ignored() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(open(&dir).await);
    let old = dir.path().join("work/notes.txt");
    let (document, versions) = track_with_versions(&engine, &old, 1).await;

    let new = engine.config().snapshot_dir().join("notes.txt");
    fs::rename(&old, &new).await.unwrap();

    let reconciler = Reconciler::detached(Arc::clone(&engine));
    let result = reconciler
        .handle_event(WatchEvent::Renamed {
            old: old.clone(),
            new: new.clone(),
        })
        .await
        .unwrap();
    assert_eq!(result, Reconciled::Ignored);

    let stored = engine.get_document(&document.id).await.unwrap();
    assert_eq!(stored.working_path, old);
    assert_eq!(stored.version_count, versions.len() as u64);
    assert!(engine.ledger().find_document_by_path(&new).await.unwrap().is_none());
}

/// Test that events the disk no longer agrees with are skipped.
#[tokio::test]
async fn test_superseded_events_are_ignored() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(open(&dir).await);
    let path = dir.path().join("work/doc.txt");
    let (document, _) = track_with_versions(&engine, &path, 1).await;
    let reconciler = Reconciler::detached(Arc::clone(&engine));

    // Editor replaced the file: it was removed and written again
    let result = reconciler
        .handle_event(WatchEvent::Deleted { path: path.clone() })
        .await
        .unwrap();
    assert_eq!(result, Reconciled::Ignored);

    // Save-by-rename: moved to a backup name, then a new file took its place
    let backup = dir.path().join("work/doc.txt~");
    fs::copy(&path, &backup).await.unwrap();
    let result = reconciler
        .handle_event(WatchEvent::Renamed {
            old: path.clone(),
            new: backup,
        })
        .await
        .unwrap();
    assert_eq!(result, Reconciled::Ignored);

    let stored = engine.get_document(&document.id).await.unwrap();
    assert_eq!(stored.working_path, path);
    assert_eq!(stored.version_count, 1);
}

/// Test the startup pass reports files removed while nothing was watching.
#[tokio::test]
async fn test_start_reports_missing_documents() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(open(&dir).await);
    let present = dir.path().join("work/present.txt");
    let absent = dir.path().join("work/absent.txt");
    let (kept, _) = track_with_versions(&engine, &present, 1).await;
    let (lost, _) = track_with_versions(&engine, &absent, 1).await;
    fs::remove_file(&absent).await.unwrap();

    let reconciler = Reconciler::detached(Arc::clone(&engine));
    let missing = reconciler.start().await.unwrap();

    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].id, lost.id);
    // Nothing is removed until the caller decides
    assert!(engine.get_document(&lost.id).await.is_ok());
    assert!(engine.get_document(&kept.id).await.is_ok());
}

/// Test a rename racing a version creation on the same document.
#[tokio::test]
async fn test_rename_and_create_serialize() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(open(&dir).await);
    let old = dir.path().join("work/race.txt");
    let (document, _) = track_with_versions(&engine, &old, 1).await;

    let new = dir.path().join("work/raced.txt");
    fs::write(&old, "edited").await.unwrap();
    fs::rename(&old, &new).await.unwrap();

    let reconciler = Reconciler::detached(Arc::clone(&engine));
    let create = {
        let engine = Arc::clone(&engine);
        let id = document.id.clone();
        tokio::spawn(async move { engine.create_new_version(&id, None).await })
    };
    let rename = reconciler
        .handle_event(WatchEvent::Renamed {
            old: old.clone(),
            new: new.clone(),
        })
        .await
        .unwrap();
    let created = create.await.unwrap();

    assert!(matches!(rename, Reconciled::Moved(_)));
    let stored = engine.get_document(&document.id).await.unwrap();
    assert_eq!(stored.working_path, new);

    // Either order is fine: the create saw the old path (and failed to read
    // it) or the new path (and snapshotted the edit)
    let versions = engine.get_versions_by_document(&document.id).await.unwrap();
    match created {
        Ok(CreateOutcome::Created(_)) => assert_eq!(versions.len(), 2),
        Ok(CreateOutcome::NoChange) => panic!("content changed"),
        Err(VcError::SnapshotUnreadable { .. }) => assert_eq!(versions.len(), 1),
        Err(e) => panic!("unexpected error: {e}"),
    }
    assert_eq!(stored.version_count, versions.len() as u64);
}

/// Test that a rename and a track racing for the same path leave one owner.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rename_and_track_of_one_path_serialize() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(open(&dir).await);
    let old = dir.path().join("work/draft.txt");
    let (document, _) = track_with_versions(&engine, &old, 1).await;

    let new = dir.path().join("work/target.txt");
    fs::rename(&old, &new).await.unwrap();

    // Another process holding the catalog stalls both sides
    let other_process = DocumentLocks::with_lock_dir(engine.config().lock_dir());
    let held = other_process.lock("catalog").await.unwrap();

    let reconciler = Reconciler::detached(Arc::clone(&engine));
    let rename = tokio::spawn({
        let (old, new) = (old.clone(), new.clone());
        async move { reconciler.handle_event(WatchEvent::Renamed { old, new }).await }
    });
    let track = tokio::spawn({
        let engine = Arc::clone(&engine);
        let new = new.clone();
        async move { engine.track_document(&new).await }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!rename.is_finished());
    assert!(!track.is_finished());
    drop(held);

    let renamed = rename.await.unwrap().unwrap();
    let tracked = track.await.unwrap();
    match renamed {
        Reconciled::Moved(moved) => {
            assert_eq!(moved.id, document.id);
            assert!(matches!(tracked, Err(VcError::AlreadyTracked { .. })));
        }
        Reconciled::Ignored => assert!(tracked.is_ok()),
        other => panic!("unexpected outcome: {other:?}"),
    }

    let owners = engine
        .list_documents()
        .await
        .unwrap()
        .into_iter()
        .filter(|d| d.working_path == new)
        .count();
    assert_eq!(owners, 1);
}

async fn wait_for<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Test the real watcher end-to-end.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_live_watcher_follows_rename_and_delete() {
    let dir = TempDir::new().unwrap();
    let (watcher, events) = FileWatcher::new(Duration::from_millis(20)).unwrap();
    let engine = Arc::new(open(&dir).await.with_watcher(Arc::new(watcher)));

    let old = dir.path().join("work/live.txt");
    let (document, _) = track_with_versions(&engine, &old, 1).await;

    let reconciler = Reconciler::new(Arc::clone(&engine), events);
    assert!(reconciler.start().await.unwrap().is_empty());
    let cancel = CancellationToken::new();
    let task = tokio::spawn(reconciler.run(cancel.clone()));

    let new: PathBuf = dir.path().join("work/renamed.txt");
    fs::rename(&old, &new).await.unwrap();

    let id = document.id.clone();
    let moved = wait_for(|| {
        let engine = Arc::clone(&engine);
        let id = id.clone();
        let new = new.clone();
        async move {
            matches!(engine.get_document(&id).await, Ok(d) if d.working_path == new)
        }
    })
    .await;
    assert!(moved, "rename was not applied");
    assert!(engine.watcher().unwrap().is_watched(&new));

    fs::remove_file(&new).await.unwrap();
    let removed = wait_for(|| {
        let engine = Arc::clone(&engine);
        let id = id.clone();
        async move { engine.get_document(&id).await.is_err() }
    })
    .await;
    assert!(removed, "delete was not applied");

    cancel.cancel();
    task.await.unwrap().unwrap();
}
