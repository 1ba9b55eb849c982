//! The version ledger: authoritative document and version records.
//!
//! Record layout in the metadata store:
//! ```text
//! documents/<document_id>                  Document
//! versions/<document_id>/<version_id>      Version
//! version_owners/<version_id>              VersionOwner (lookup by version id)
//! ```
//!
//! Every mutation that touches more than one record goes through a single
//! [`Batch`]. `version_count` is always recomputed from the stored version
//! rows rather than incremented from a cached value, and
//! [`Ledger::recover`] repairs any drift left by an interrupted batch.

use crate::model::{sort_newest_first, Document, Version};
use crate::{VcError, VcResult};
use chrono::Utc;
use docvault_storage::{Batch, Storage};
use docvault_util::Identifier;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DOCUMENTS: &str = "documents";
const VERSIONS: &str = "versions";
const VERSION_OWNERS: &str = "version_owners";

/// Index record mapping a version id to its document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionOwner {
    document_id: String,
}

/// What [`Ledger::recover`] repaired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Documents whose `version_count` was corrected.
    pub recounted: Vec<String>,
    /// Version rows removed because their document no longer exists.
    pub orphaned_versions: Vec<String>,
    /// Snapshot files those rows pointed at. The ledger does not touch files.
    pub leaked_snapshots: Vec<PathBuf>,
    /// Index entries removed because their version row was missing.
    pub dangling_index_entries: usize,
}

impl RecoveryReport {
    /// Whether nothing needed repair.
    pub fn is_clean(&self) -> bool {
        self.recounted.is_empty()
            && self.orphaned_versions.is_empty()
            && self.dangling_index_entries == 0
    }
}

/// Document and version records on top of a metadata [`Storage`].
#[derive(Debug)]
pub struct Ledger<S> {
    storage: S,
}

impl<S: Storage> Ledger<S> {
    /// Create a ledger over a metadata store.
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// The underlying metadata store.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    // ----- documents -----

    /// Store a new document record.
    pub async fn insert_document(&self, document: &Document) -> VcResult<()> {
        self.storage
            .write(&[DOCUMENTS, &document.id], document)
            .await?;
        debug!(document = %document.id, "Inserted document record");
        Ok(())
    }

    /// Fetch a document, or `DocumentNotFound`.
    pub async fn get_document(&self, id: &str) -> VcResult<Document> {
        self.find_document(id)
            .await?
            .ok_or_else(|| VcError::DocumentNotFound(id.to_string()))
    }

    /// Fetch a document if it exists.
    pub async fn find_document(&self, id: &str) -> VcResult<Option<Document>> {
        Ok(self.storage.read(&[DOCUMENTS, id]).await?)
    }

    /// All documents, oldest first.
    pub async fn list_documents(&self) -> VcResult<Vec<Document>> {
        let mut documents = Vec::new();
        for key in self.storage.list(&[DOCUMENTS]).await? {
            let Some(id) = key.last() else { continue };
            match self.find_document(id).await? {
                Some(document) => documents.push(document),
                None => debug!(document = %id, "Document vanished while listing"),
            }
        }
        documents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(documents)
    }

    /// Find the document whose working copy lives at `path`.
    pub async fn find_document_by_path(&self, path: &Path) -> VcResult<Option<Document>> {
        Ok(self
            .list_documents()
            .await?
            .into_iter()
            .find(|d| d.working_path == path))
    }

    /// Point a document at a new working path. Id and versions are kept.
    pub async fn relocate_document(&self, id: &str, new_path: &Path) -> VcResult<Document> {
        let mut document = self.get_document(id).await?;
        document.relocate(new_path);
        self.storage.write(&[DOCUMENTS, id], &document).await?;
        Ok(document)
    }

    /// Bump a document's `modified_at`.
    pub async fn touch_document(&self, id: &str) -> VcResult<Document> {
        let mut document = self.get_document(id).await?;
        document.modified_at = Utc::now();
        self.storage.write(&[DOCUMENTS, id], &document).await?;
        Ok(document)
    }

    /// Remove a document row after cascading over any remaining version
    /// rows. Returns the version rows that were still present.
    ///
    /// Idempotent: a missing document is not an error.
    pub async fn delete_document(&self, id: &str) -> VcResult<Vec<Version>> {
        let versions = self.get_versions_by_document(id).await?;

        let mut batch = Batch::new();
        for version in &versions {
            batch = batch
                .delete(&[VERSIONS, id, &version.id])
                .delete(&[VERSION_OWNERS, &version.id]);
        }
        // Version rows go first so no version ever points at a missing document
        batch = batch.delete(&[DOCUMENTS, id]);
        self.storage.apply(batch).await?;

        info!(document = %id, versions = versions.len(), "Deleted document record");
        Ok(versions)
    }

    // ----- versions -----

    /// Record a new version and update its document in one batch.
    ///
    /// `version_count` is recomputed from the stored rows, `last_ordinal`
    /// advances to `ordinal` and `modified_at` is bumped. The new version's
    /// `created_at` never sorts before the current latest version.
    pub async fn add_version(
        &self,
        document_id: &str,
        ordinal: u64,
        snapshot_path: PathBuf,
        description: Option<String>,
    ) -> VcResult<(Document, Version)> {
        let mut document = self.get_document(document_id).await?;
        let existing = self.get_versions_by_document(document_id).await?;

        let mut created_at = Utc::now();
        if let Some(latest) = existing.first() {
            created_at = created_at.max(latest.created_at);
        }

        let version = Version {
            id: Identifier::version(),
            document_id: document_id.to_string(),
            ordinal,
            description,
            snapshot_path,
            created_at,
        };

        document.version_count = existing.len() as u64 + 1;
        document.last_ordinal = document.last_ordinal.max(ordinal);
        document.modified_at = created_at;

        let batch = Batch::new()
            .put(&[VERSIONS, document_id, &version.id], &version)?
            .put(
                &[VERSION_OWNERS, &version.id],
                &VersionOwner {
                    document_id: document_id.to_string(),
                },
            )?
            .put(&[DOCUMENTS, document_id], &document)?;
        self.storage.apply(batch).await?;

        debug!(
            document = %document_id,
            version = %version.id,
            ordinal,
            "Recorded version"
        );
        Ok((document, version))
    }

    /// All versions of a document, newest first.
    pub async fn get_versions_by_document(&self, document_id: &str) -> VcResult<Vec<Version>> {
        let mut versions = Vec::new();
        for key in self.storage.list(&[VERSIONS, document_id]).await? {
            let Some(id) = key.last() else { continue };
            if let Some(version) = self.storage.read(&[VERSIONS, document_id, id]).await? {
                versions.push(version);
            }
        }
        sort_newest_first(&mut versions);
        Ok(versions)
    }

    /// Fetch a version by id, or `VersionNotFound`.
    pub async fn get_version(&self, id: &str) -> VcResult<Version> {
        self.find_version(id)
            .await?
            .ok_or_else(|| VcError::VersionNotFound(id.to_string()))
    }

    /// Fetch a version by id if it exists.
    pub async fn find_version(&self, id: &str) -> VcResult<Option<Version>> {
        let Some(owner) = self
            .storage
            .read::<VersionOwner>(&[VERSION_OWNERS, id])
            .await?
        else {
            return Ok(None);
        };
        Ok(self
            .storage
            .read(&[VERSIONS, &owner.document_id, id])
            .await?)
    }

    /// The newest version of a document.
    pub async fn get_latest(&self, document_id: &str) -> VcResult<Option<Version>> {
        Ok(self
            .get_versions_by_document(document_id)
            .await?
            .into_iter()
            .next())
    }

    /// Remove a version row and recount its document. Returns the removed
    /// version.
    pub async fn delete_version(&self, id: &str) -> VcResult<Version> {
        let version = self.get_version(id).await?;
        let document_id = version.document_id.clone();

        let mut batch = Batch::new()
            .delete(&[VERSIONS, &document_id, id])
            .delete(&[VERSION_OWNERS, id]);

        if let Some(mut document) = self.find_document(&document_id).await? {
            let remaining = self
                .get_versions_by_document(&document_id)
                .await?
                .iter()
                .filter(|v| v.id != id)
                .count();
            document.version_count = remaining as u64;
            document.modified_at = Utc::now();
            batch = batch.put(&[DOCUMENTS, &document_id], &document)?;
        }

        self.storage.apply(batch).await?;
        debug!(document = %document_id, version = %id, "Removed version record");
        Ok(version)
    }

    /// Replace a version's description.
    pub async fn change_description(&self, id: &str, text: Option<String>) -> VcResult<Version> {
        let mut version = self.get_version(id).await?;
        version.description = text.filter(|t| !t.is_empty());
        self.storage
            .write(&[VERSIONS, &version.document_id, id], &version)
            .await?;
        Ok(version)
    }

    // ----- recovery -----

    /// Re-derive every `version_count` from the stored rows and drop rows
    /// left behind by interrupted deletes. Run once at startup.
    pub async fn recover(&self) -> VcResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let documents = self.list_documents().await?;
        let known: HashSet<&str> = documents.iter().map(|d| d.id.as_str()).collect();

        for key in self.storage.list(&[VERSION_OWNERS]).await? {
            let Some(version_id) = key.last() else { continue };
            let Some(owner) = self
                .storage
                .read::<VersionOwner>(&[VERSION_OWNERS, version_id])
                .await?
            else {
                continue;
            };

            let row = [VERSIONS, owner.document_id.as_str(), version_id.as_str()];
            if !known.contains(owner.document_id.as_str()) {
                let orphan = self.storage.read::<Version>(&row).await?;
                let batch = Batch::new()
                    .delete(&row)
                    .delete(&[VERSION_OWNERS, version_id]);
                self.storage.apply(batch).await?;

                match orphan {
                    Some(version) => {
                        warn!(
                            version = %version_id,
                            document = %owner.document_id,
                            snapshot = %version.snapshot_path.display(),
                            "Removed version of missing document"
                        );
                        report.leaked_snapshots.push(version.snapshot_path);
                    }
                    None => warn!(
                        version = %version_id,
                        document = %owner.document_id,
                        "Removed version of missing document"
                    ),
                }
                report.orphaned_versions.push(version_id.clone());
            } else if !self.storage.exists(&row).await? {
                self.storage.remove(&[VERSION_OWNERS, version_id]).await?;
                report.dangling_index_entries += 1;
            }
        }

        for mut document in documents {
            let versions = self.get_versions_by_document(&document.id).await?;
            let actual = versions.len() as u64;
            let max_ordinal = versions.iter().map(|v| v.ordinal).max().unwrap_or(0);

            if document.version_count != actual || document.last_ordinal < max_ordinal {
                warn!(
                    document = %document.id,
                    stored = document.version_count,
                    actual,
                    "Correcting version count"
                );
                document.version_count = actual;
                document.last_ordinal = document.last_ordinal.max(max_ordinal);
                self.storage
                    .write(&[DOCUMENTS, &document.id], &document)
                    .await?;
                report.recounted.push(document.id.clone());
            }
        }

        if !report.is_clean() {
            info!(?report, "Ledger recovery repaired metadata");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docvault_storage::MemoryStorage;

    async fn ledger_with_document() -> (Ledger<MemoryStorage>, Document) {
        let ledger = Ledger::new(MemoryStorage::new());
        let document = Document::new("/work/report.txt");
        ledger.insert_document(&document).await.unwrap();
        (ledger, document)
    }

    async fn add(ledger: &Ledger<MemoryStorage>, document_id: &str, ordinal: u64) -> Version {
        ledger
            .add_version(
                document_id,
                ordinal,
                PathBuf::from(format!("/snap/{ordinal}")),
                Some(format!("v{ordinal}")),
            )
            .await
            .unwrap()
            .1
    }

    #[tokio::test]
    async fn add_version_keeps_count_in_step() {
        let (ledger, document) = ledger_with_document().await;

        for ordinal in 1..=3 {
            add(&ledger, &document.id, ordinal).await;
        }

        let stored = ledger.get_document(&document.id).await.unwrap();
        let versions = ledger.get_versions_by_document(&document.id).await.unwrap();
        assert_eq!(stored.version_count, 3);
        assert_eq!(stored.last_ordinal, 3);
        assert_eq!(versions.len(), 3);
        let ordinals: Vec<u64> = versions.iter().map(|v| v.ordinal).collect();
        assert_eq!(ordinals, vec![3, 2, 1]);
        assert!(versions
            .windows(2)
            .all(|w| w[0].created_at >= w[1].created_at));
    }

    #[tokio::test]
    async fn get_latest_and_by_id() {
        let (ledger, document) = ledger_with_document().await;
        assert!(ledger.get_latest(&document.id).await.unwrap().is_none());

        let first = add(&ledger, &document.id, 1).await;
        let second = add(&ledger, &document.id, 2).await;

        assert_eq!(ledger.get_latest(&document.id).await.unwrap(), Some(second));
        assert_eq!(ledger.get_version(&first.id).await.unwrap(), first);
        assert!(matches!(
            ledger.get_version("ver_missing").await,
            Err(VcError::VersionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn add_version_to_missing_document_fails() {
        let ledger = Ledger::new(MemoryStorage::new());
        let result = ledger
            .add_version("doc_missing", 1, PathBuf::from("/snap/1"), None)
            .await;
        assert!(matches!(result, Err(VcError::DocumentNotFound(_))));
    }

    #[tokio::test]
    async fn delete_version_recounts() {
        let (ledger, document) = ledger_with_document().await;
        let first = add(&ledger, &document.id, 1).await;
        add(&ledger, &document.id, 2).await;

        let removed = ledger.delete_version(&first.id).await.unwrap();
        assert_eq!(removed.id, first.id);

        let stored = ledger.get_document(&document.id).await.unwrap();
        assert_eq!(stored.version_count, 1);
        assert_eq!(stored.next_ordinal(), 3);
        assert!(ledger.find_version(&first.id).await.unwrap().is_none());
        assert!(ledger.delete_version(&first.id).await.is_err());
    }

    #[tokio::test]
    async fn change_description_mutates_only_description() {
        let (ledger, document) = ledger_with_document().await;
        let version = add(&ledger, &document.id, 1).await;

        let updated = ledger
            .change_description(&version.id, Some("final draft".to_string()))
            .await
            .unwrap();
        assert_eq!(updated.description.as_deref(), Some("final draft"));
        assert_eq!(updated.snapshot_path, version.snapshot_path);
        assert_eq!(updated.created_at, version.created_at);

        let cleared = ledger
            .change_description(&version.id, Some(String::new()))
            .await
            .unwrap();
        assert!(cleared.description.is_none());
    }

    #[tokio::test]
    async fn delete_document_cascades() {
        let (ledger, document) = ledger_with_document().await;
        let versions = vec![
            add(&ledger, &document.id, 1).await,
            add(&ledger, &document.id, 2).await,
            add(&ledger, &document.id, 3).await,
        ];

        let removed = ledger.delete_document(&document.id).await.unwrap();
        assert_eq!(removed.len(), 3);
        assert!(ledger.find_document(&document.id).await.unwrap().is_none());
        for version in versions {
            assert!(ledger.find_version(&version.id).await.unwrap().is_none());
        }
        assert!(ledger.storage().is_empty());

        // Retrying is harmless
        assert!(ledger.delete_document(&document.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn relocate_keeps_identity() {
        let (ledger, document) = ledger_with_document().await;
        add(&ledger, &document.id, 1).await;

        let moved = ledger
            .relocate_document(&document.id, Path::new("/archive/final.txt"))
            .await
            .unwrap();
        assert_eq!(moved.id, document.id);
        assert_eq!(moved.name, "final.txt");
        assert_eq!(moved.version_count, 1);

        let found = ledger
            .find_document_by_path(Path::new("/archive/final.txt"))
            .await
            .unwrap();
        assert_eq!(found.map(|d| d.id), Some(document.id.clone()));
        assert!(ledger
            .find_document_by_path(Path::new("/work/report.txt"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn recover_fixes_drifted_counts() {
        let (ledger, mut document) = ledger_with_document().await;
        add(&ledger, &document.id, 1).await;
        add(&ledger, &document.id, 2).await;

        // Simulate a crash that lost the document half of a batch
        document.version_count = 0;
        document.last_ordinal = 0;
        ledger
            .storage()
            .write(&[DOCUMENTS, &document.id], &document)
            .await
            .unwrap();

        let report = ledger.recover().await.unwrap();
        assert_eq!(report.recounted, vec![document.id.clone()]);

        let stored = ledger.get_document(&document.id).await.unwrap();
        assert_eq!(stored.version_count, 2);
        assert_eq!(stored.next_ordinal(), 3);
        assert!(ledger.recover().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn recover_drops_versions_of_missing_documents() {
        let (ledger, document) = ledger_with_document().await;
        let version = add(&ledger, &document.id, 1).await;
        ledger
            .storage()
            .remove(&[DOCUMENTS, &document.id])
            .await
            .unwrap();

        let report = ledger.recover().await.unwrap();
        assert_eq!(report.orphaned_versions, vec![version.id.clone()]);
        assert_eq!(report.leaked_snapshots, vec![version.snapshot_path.clone()]);
        assert!(ledger.find_version(&version.id).await.unwrap().is_none());
    }
}
