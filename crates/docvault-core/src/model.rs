//! Document and version records.
//!
//! These are plain values. The ledger hands out copies and every mutation
//! re-reads the stored record by id, so a stale copy held by a caller can
//! never be written back over newer state.

use chrono::{DateTime, Utc};
use docvault_util::{path::display_name, Identifier};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Identifier of a tracked document (`doc_<ulid>`).
pub type DocumentId = String;

/// Identifier of a version (`ver_<ulid>`).
pub type VersionId = String;

/// A tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,

    /// Display name, the file name of `working_path`.
    pub name: String,

    /// Current on-disk location of the working copy.
    pub working_path: PathBuf,

    pub created_at: DateTime<Utc>,

    pub modified_at: DateTime<Utc>,

    /// Number of stored versions. Maintained by the ledger only.
    pub version_count: u64,

    /// Highest version ordinal ever handed out. Never decreases, so snapshot
    /// paths are never reused after a version is deleted.
    #[serde(default)]
    pub last_ordinal: u64,
}

impl Document {
    /// Create a record for a newly tracked file.
    pub fn new(working_path: impl Into<PathBuf>) -> Self {
        let working_path = working_path.into();
        let now = Utc::now();
        Self {
            id: Identifier::document(),
            name: display_name(&working_path),
            working_path,
            created_at: now,
            modified_at: now,
            version_count: 0,
            last_ordinal: 0,
        }
    }

    /// Ordinal the next version of this document will get.
    pub fn next_ordinal(&self) -> u64 {
        self.last_ordinal.max(self.version_count) + 1
    }

    /// Point the document at a new location, renaming it to match.
    pub fn relocate(&mut self, new_path: &Path) {
        self.working_path = new_path.to_path_buf();
        self.name = display_name(new_path);
        self.modified_at = Utc::now();
    }
}

/// A stored snapshot of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,

    pub document_id: DocumentId,

    /// Per-document sequence number, used for naming and to break
    /// `created_at` ties.
    pub ordinal: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Private copy of the content. Set once, never a working path.
    pub snapshot_path: PathBuf,

    pub created_at: DateTime<Utc>,
}

impl Version {
    /// Recency order: older versions compare less.
    pub fn recency_cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then(self.ordinal.cmp(&other.ordinal))
            .then_with(|| self.id.cmp(&other.id))
    }

    /// Whether `self` comes after `other` in recency order.
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.recency_cmp(other) == Ordering::Greater
    }
}

/// Sort versions newest first.
pub fn sort_newest_first(versions: &mut [Version]) {
    versions.sort_by(|a, b| b.recency_cmp(a));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn version(ordinal: u64, created_at: DateTime<Utc>) -> Version {
        Version {
            id: Identifier::version(),
            document_id: "doc_1".to_string(),
            ordinal,
            description: None,
            snapshot_path: PathBuf::from(format!("/s/{ordinal}")),
            created_at,
        }
    }

    #[test]
    fn new_document_takes_file_name() {
        let doc = Document::new("/home/me/notes/plan.md");
        assert_eq!(doc.name, "plan.md");
        assert_eq!(doc.version_count, 0);
        assert_eq!(doc.next_ordinal(), 1);
        assert!(doc.id.starts_with("doc_"));
    }

    #[test]
    fn relocate_updates_path_and_name() {
        let mut doc = Document::new("/a/old.txt");
        let id = doc.id.clone();
        doc.relocate(Path::new("/b/new.txt"));
        assert_eq!(doc.id, id);
        assert_eq!(doc.name, "new.txt");
        assert_eq!(doc.working_path, PathBuf::from("/b/new.txt"));
    }

    #[test]
    fn next_ordinal_never_reuses() {
        let mut doc = Document::new("/a.txt");
        doc.last_ordinal = 5;
        doc.version_count = 2;
        assert_eq!(doc.next_ordinal(), 6);
    }

    #[test]
    fn ties_break_on_ordinal() {
        let now = Utc::now();
        let mut versions = vec![
            version(1, now),
            version(3, now),
            version(2, now),
            version(0, now - Duration::seconds(5)),
        ];
        sort_newest_first(&mut versions);
        let ordinals: Vec<u64> = versions.iter().map(|v| v.ordinal).collect();
        assert_eq!(ordinals, vec![3, 2, 1, 0]);
        assert!(versions[0].is_newer_than(&versions[1]));
    }
}
