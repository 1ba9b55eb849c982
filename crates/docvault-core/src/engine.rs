//! The version control engine.
//!
//! [`VersionControl`] implements the user-facing operations on top of the
//! [`Ledger`] (metadata) and the [`SnapshotStore`] (bytes). Every operation
//! that reads and then writes a document's state runs under that
//! document's lock from [`DocumentLocks`]. Assigning a working path to a
//! document additionally holds the catalog lock, so two documents never
//! end up at the same path.

use crate::ledger::{Ledger, RecoveryReport};
use crate::lock::{DocumentGuard, DocumentLocks};
use crate::model::{Document, Version};
use crate::watch::FileWatcher;
use crate::{Config, VcError, VcResult};
use docvault_snapshot::{diff, DiffLine, SnapshotError, SnapshotStore};
use docvault_storage::Storage;
use docvault_util::path::{absolutize, is_within, normalize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lock key serializing every change of a document's working path.
/// Always taken after the document's own lock, never before.
pub(crate) const CATALOG_LOCK: &str = "catalog";

/// Result of an operation that may create a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new version was recorded.
    Created(Version),
    /// The working copy matches the latest version; nothing was written.
    NoChange,
}

impl CreateOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    pub fn version(&self) -> Option<&Version> {
        match self {
            Self::Created(version) => Some(version),
            Self::NoChange => None,
        }
    }
}

/// Result of switching to a version and discarding newer ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The working copy now holds `target`; `pruned` versions were removed.
    Switched { target: Version, pruned: Vec<Version> },
    /// The document has no versions to switch between.
    NothingToSwitch,
}

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffSource {
    /// A version already fetched.
    Version(Version),
    /// A version id to look up.
    VersionId(String),
    /// The current working copy of a document.
    Working(String),
    /// Any file.
    Path(PathBuf),
}

/// Document version control over a metadata store `S`.
#[derive(Debug)]
pub struct VersionControl<S> {
    config: Config,
    ledger: Ledger<S>,
    snapshots: SnapshotStore,
    locks: DocumentLocks,
    watcher: Option<Arc<FileWatcher>>,
}

impl<S: Storage> VersionControl<S> {
    /// Create an engine with an explicit configuration and metadata store.
    ///
    /// The storage root is resolved once here, so a relative root keeps
    /// naming the same directory for the engine's lifetime.
    pub async fn new(mut config: Config, storage: S) -> VcResult<Self> {
        config.storage_root = Some(config.storage_root());
        let snapshots = SnapshotStore::new(config.snapshot_dir()).await?;
        debug!(root = %snapshots.root().display(), "Opened snapshot store");
        Ok(Self {
            locks: DocumentLocks::with_lock_dir(config.lock_dir()),
            config,
            ledger: Ledger::new(storage),
            snapshots,
            watcher: None,
        })
    }

    /// Attach a file watcher. Tracked, relinked and deleted documents are
    /// registered with it from then on.
    pub fn with_watcher(mut self, watcher: Arc<FileWatcher>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn locks(&self) -> &DocumentLocks {
        &self.locks
    }

    pub fn watcher(&self) -> Option<&Arc<FileWatcher>> {
        self.watcher.as_ref()
    }

    /// Repair metadata left inconsistent by an interrupted run, and delete
    /// the snapshot files of version rows the repair dropped.
    pub async fn recover(&self) -> VcResult<RecoveryReport> {
        let report = self.ledger.recover().await?;

        for path in &report.leaked_snapshots {
            if !self.snapshots.owns(path) {
                warn!(path = %path.display(), "Leaked snapshot is outside the snapshot store");
                continue;
            }
            match self.snapshots.remove_if_exists(path).await {
                Ok(true) => info!(path = %path.display(), "Deleted leaked snapshot"),
                Ok(false) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Could not delete leaked snapshot"),
            }
        }
        Ok(report)
    }

    // ----- catalog -----

    /// Start tracking the file at `path`.
    pub async fn track_document(&self, path: &Path) -> VcResult<Document> {
        let path = self.checked_working_path(path).await?;

        let _catalog = self.locks.lock(CATALOG_LOCK).await?;
        if let Some(existing) = self.ledger.find_document_by_path(&path).await? {
            return Err(VcError::AlreadyTracked {
                path,
                document: existing.id,
            });
        }

        let document = Document::new(path);
        self.ledger.insert_document(&document).await?;
        self.watch(&document.working_path);

        info!(
            document = %document.id,
            path = %document.working_path.display(),
            "Document tracked"
        );
        Ok(document)
    }

    /// Stop tracking a document, removing all its versions and snapshot files.
    pub async fn delete_document(&self, document_id: &str) -> VcResult<Document> {
        let guard = self.locks.lock(document_id).await?;
        let document = self.ledger.get_document(document_id).await?;
        self.purge_document(&guard, &document).await?;
        Ok(document)
    }

    /// Point a document at a replacement file, e.g. after it was moved
    /// while nothing was watching.
    pub async fn relink_document(&self, document_id: &str, new_path: &Path) -> VcResult<Document> {
        let new_path = self.checked_working_path(new_path).await?;
        let guard = self.locks.lock(document_id).await?;
        let _catalog = self.locks.lock(CATALOG_LOCK).await?;

        if let Some(other) = self.ledger.find_document_by_path(&new_path).await? {
            if other.id != document_id {
                return Err(VcError::AlreadyTracked {
                    path: new_path,
                    document: other.id,
                });
            }
        }

        let document = self.relocate_document(&guard, &new_path).await?;
        info!(
            document = %document.id,
            path = %new_path.display(),
            "Document relinked"
        );
        Ok(document)
    }

    pub async fn list_documents(&self) -> VcResult<Vec<Document>> {
        self.ledger.list_documents().await
    }

    pub async fn get_document(&self, document_id: &str) -> VcResult<Document> {
        self.ledger.get_document(document_id).await
    }

    /// Versions of a document, newest first.
    pub async fn get_versions_by_document(&self, document_id: &str) -> VcResult<Vec<Version>> {
        self.ledger.get_document(document_id).await?;
        self.ledger.get_versions_by_document(document_id).await
    }

    pub async fn get_version(&self, version_id: &str) -> VcResult<Version> {
        self.ledger.get_version(version_id).await
    }

    pub async fn get_latest(&self, document_id: &str) -> VcResult<Option<Version>> {
        self.ledger.get_latest(document_id).await
    }

    // ----- versions -----

    /// Snapshot the working copy if it differs from the latest version.
    pub async fn create_new_version(
        &self,
        document_id: &str,
        description: Option<String>,
    ) -> VcResult<CreateOutcome> {
        let guard = self.locks.lock(document_id).await?;
        self.create_locked(&guard, description).await
    }

    /// Restore `version_id` into the working copy and delete every newer
    /// version.
    ///
    /// A `new_description`, if given, replaces the target's description.
    pub async fn switch_to_version_and_delete_newer(
        &self,
        document_id: &str,
        version_id: &str,
        new_description: Option<String>,
    ) -> VcResult<SwitchOutcome> {
        let guard = self.locks.lock(document_id).await?;
        let document = self.ledger.get_document(document_id).await?;
        let versions = self.ledger.get_versions_by_document(document_id).await?;

        if versions.is_empty() {
            info!(document = %document_id, "No versions to switch to");
            return Ok(SwitchOutcome::NothingToSwitch);
        }

        let mut target = versions
            .iter()
            .find(|v| v.id == version_id)
            .cloned()
            .ok_or_else(|| VcError::VersionNotFound(version_id.to_string()))?;

        self.restore(&target, &document.working_path).await?;

        let mut pruned = Vec::new();
        for version in versions.into_iter().filter(|v| v.is_newer_than(&target)) {
            self.delete_version_locked(&guard, &version.id).await?;
            pruned.push(version);
        }

        if let Some(text) = new_description {
            target = self.ledger.change_description(&target.id, Some(text)).await?;
        }
        self.ledger.touch_document(document_id).await?;

        info!(
            document = %document_id,
            version = %target.id,
            pruned = pruned.len(),
            "Switched to version"
        );
        Ok(SwitchOutcome::Switched { target, pruned })
    }

    /// Restore `version_id` into the working copy and record it as a new
    /// latest version. History is kept.
    pub async fn switch_to_version_and_save_as_latest(
        &self,
        document_id: &str,
        version_id: &str,
        new_description: Option<String>,
    ) -> VcResult<CreateOutcome> {
        let guard = self.locks.lock(document_id).await?;
        let document = self.ledger.get_document(document_id).await?;
        let target = self.owned_version(document_id, version_id).await?;

        self.restore(&target, &document.working_path).await?;
        let outcome = self.create_locked(&guard, new_description).await?;

        info!(
            document = %document_id,
            version = %target.id,
            created = outcome.is_created(),
            "Switched to version"
        );
        Ok(outcome)
    }

    /// Replace a version's description.
    pub async fn change_version_description(
        &self,
        version_id: &str,
        text: Option<String>,
    ) -> VcResult<Version> {
        let version = self.ledger.get_version(version_id).await?;
        let _guard = self.locks.lock(&version.document_id).await?;

        let updated = self.ledger.change_description(version_id, text).await?;
        debug!(version = %version_id, "Version description changed");
        Ok(updated)
    }

    /// Delete one version and its snapshot file.
    pub async fn delete_version(&self, version_id: &str) -> VcResult<Version> {
        let version = self.ledger.get_version(version_id).await?;
        let guard = self.locks.lock(&version.document_id).await?;
        self.delete_version_locked(&guard, version_id).await
    }

    /// Line diff between two sources.
    pub async fn get_version_difference(
        &self,
        old: &DiffSource,
        new: &DiffSource,
    ) -> VcResult<Vec<DiffLine>> {
        let (_, old_text) = self.resolve_text(old).await?;
        let (_, new_text) = self.resolve_text(new).await?;
        Ok(diff::diff(&old_text, &new_text))
    }

    /// Read one side of a comparison. Returns a label for display and the
    /// text.
    pub async fn resolve_text(&self, source: &DiffSource) -> VcResult<(String, String)> {
        let (label, path) = match source {
            DiffSource::Version(version) => (version_label(version), version.snapshot_path.clone()),
            DiffSource::VersionId(id) => {
                let version = self.ledger.get_version(id).await?;
                (version_label(&version), version.snapshot_path)
            }
            DiffSource::Working(document_id) => {
                let document = self.ledger.get_document(document_id).await?;
                (
                    document.working_path.display().to_string(),
                    document.working_path,
                )
            }
            DiffSource::Path(path) => (path.display().to_string(), path.clone()),
        };

        let text = self.snapshots.read_text(&path).await?;
        Ok((label, text))
    }

    // ----- locked steps -----

    async fn create_locked(
        &self,
        guard: &DocumentGuard,
        description: Option<String>,
    ) -> VcResult<CreateOutcome> {
        let document_id = guard.document_id();
        let document = self.ledger.get_document(document_id).await?;

        if let Some(latest) = self.ledger.get_latest(document_id).await? {
            let changed =
                diff::files_changed(&latest.snapshot_path, &document.working_path).await?;
            if !changed {
                debug!(document = %document_id, "No change since latest version");
                return Ok(CreateOutcome::NoChange);
            }
        }

        let ordinal = document.next_ordinal();
        let snapshot_path =
            self.snapshots
                .snapshot_path(document_id, ordinal, &document.working_path);

        if let Err(e) = self
            .snapshots
            .copy(&document.working_path, &snapshot_path)
            .await
        {
            error!(
                document = %document_id,
                path = %e.path().display(),
                error = %e,
                "Snapshot copy failed"
            );
            return Err(e.into());
        }

        let description = description.filter(|d| !d.is_empty());
        let version = match self
            .ledger
            .add_version(document_id, ordinal, snapshot_path.clone(), description)
            .await
        {
            Ok((_, version)) => version,
            Err(e) => {
                error!(
                    document = %document_id,
                    path = %snapshot_path.display(),
                    error = %e,
                    "Orphaned snapshot: version row was not written"
                );
                return Err(VcError::OrphanedSnapshot {
                    document: document_id.to_string(),
                    path: snapshot_path,
                    source: Box::new(e),
                });
            }
        };

        info!(
            document = %document_id,
            version = %version.id,
            ordinal,
            "Version created"
        );
        Ok(CreateOutcome::Created(version))
    }

    async fn delete_version_locked(
        &self,
        guard: &DocumentGuard,
        version_id: &str,
    ) -> VcResult<Version> {
        let version = self.owned_version(guard.document_id(), version_id).await?;
        self.ledger.delete_version(version_id).await?;

        match self.snapshots.remove_if_exists(&version.snapshot_path).await {
            Ok(true) => {}
            Ok(false) => debug!(
                path = %version.snapshot_path.display(),
                "Snapshot file already gone"
            ),
            Err(e) => {
                error!(version = %version_id, error = %e, "Failed to delete snapshot file");
                return Err(e.into());
            }
        }

        info!(
            document = %version.document_id,
            version = %version_id,
            "Version deleted"
        );
        Ok(version)
    }

    /// Remove a document with every version row and snapshot file.
    ///
    /// Snapshot files go first, then all rows in one batch. Files already
    /// gone are skipped, so a retry after a failure at any step completes
    /// the removal.
    pub(crate) async fn purge_document(
        &self,
        guard: &DocumentGuard,
        document: &Document,
    ) -> VcResult<()> {
        debug_assert_eq!(guard.document_id(), document.id);
        self.unwatch(&document.working_path);

        let versions = self.ledger.get_versions_by_document(&document.id).await?;
        for version in &versions {
            if let Err(e) = self.snapshots.remove_if_exists(&version.snapshot_path).await {
                error!(document = %document.id, error = %e, "Failed to delete snapshot file");
                return Err(e.into());
            }
        }

        self.ledger.delete_document(&document.id).await?;
        self.snapshots.prune_document_dir(&document.id).await?;

        info!(
            document = %document.id,
            versions = versions.len(),
            "Document deleted"
        );
        Ok(())
    }

    /// Move a document to `new_path` and follow it with the watcher.
    ///
    /// The caller holds the catalog lock and has checked that no other
    /// document is at `new_path`.
    pub(crate) async fn relocate_document(
        &self,
        guard: &DocumentGuard,
        new_path: &Path,
    ) -> VcResult<Document> {
        let old = self.ledger.get_document(guard.document_id()).await?;
        let document = self
            .ledger
            .relocate_document(guard.document_id(), new_path)
            .await?;

        if old.working_path != document.working_path {
            // Watch first so a shared parent directory stays registered
            self.watch(&document.working_path);
            self.unwatch(&old.working_path);
        }
        Ok(document)
    }

    // ----- helpers -----

    async fn owned_version(&self, document_id: &str, version_id: &str) -> VcResult<Version> {
        match self.ledger.find_version(version_id).await? {
            Some(version) if version.document_id == document_id => Ok(version),
            _ => Err(VcError::VersionNotFound(version_id.to_string())),
        }
    }

    /// Copy a version's snapshot over the working copy.
    async fn restore(&self, version: &Version, working_path: &Path) -> VcResult<()> {
        match self.snapshots.copy(&version.snapshot_path, working_path).await {
            Ok(_) => Ok(()),
            Err(SnapshotError::Io { path, source }) if path == version.snapshot_path => {
                error!(version = %version.id, path = %path.display(), "Snapshot unreadable");
                Err(VcError::SnapshotUnreadable { path, source })
            }
            Err(e) => {
                error!(version = %version.id, error = %e, "Failed to restore working copy");
                Err(e.into())
            }
        }
    }

    /// Whether `path` is docvault's own data, where a working copy could
    /// alias a snapshot, metadata or lock file.
    pub(crate) fn in_storage(&self, path: &Path) -> bool {
        let path = normalize(path);
        path == self.config.storage_root()
            || self.snapshots.owns(&path)
            || is_within(&path, &self.config.metadata_dir())
            || is_within(&path, &self.config.lock_dir())
    }

    async fn checked_working_path(&self, path: &Path) -> VcResult<PathBuf> {
        let path = absolutize(path).map_err(|e| VcError::io(path, e))?;

        if self.in_storage(&path) {
            return Err(VcError::InvalidPath {
                path,
                reason: "inside the docvault storage directory".to_string(),
            });
        }

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(VcError::InvalidPath {
                path,
                reason: "not a regular file".to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(VcError::InvalidPath {
                path,
                reason: "file does not exist".to_string(),
            }),
            Err(e) => Err(VcError::io(path, e)),
        }
    }

    fn watch(&self, path: &Path) {
        if let Some(watcher) = &self.watcher {
            if let Err(e) = watcher.watch(path) {
                warn!(path = %path.display(), error = %e, "Could not watch file");
            }
        }
    }

    fn unwatch(&self, path: &Path) {
        if let Some(watcher) = &self.watcher {
            watcher.unwatch_path(path);
        }
    }
}

fn version_label(version: &Version) -> String {
    match &version.description {
        Some(text) => format!("#{} {}", version.ordinal, text),
        None => format!("#{}", version.ordinal),
    }
}
