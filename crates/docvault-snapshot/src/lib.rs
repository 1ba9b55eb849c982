//! Snapshot storage and change detection for docvault.
//!
//! Every version of a tracked document is a full, independent copy of the
//! working file. This crate provides:
//! - [`SnapshotStore`]: copy, read, delete and probe snapshot and working files
//! - [`diff`]: the change gate used before creating a version, and a
//!   line-tagged diff for showing what changed between two versions
//!
//! # Example
//!
//! ```no_run
//! use docvault_snapshot::{diff, SnapshotStore};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SnapshotStore::new("/var/lib/docvault/snapshots").await?;
//! let working = Path::new("/home/me/report.txt");
//! let snapshot = store.snapshot_path("doc_01h...", 1, working);
//!
//! store.copy(working, &snapshot).await?;
//! assert!(!diff::files_changed(working, &snapshot).await?);
//! # Ok(())
//! # }
//! ```

pub mod diff;
mod error;
mod store;

pub use diff::{DiffLine, LineStatus};
pub use error::{SnapshotError, SnapshotResult};
pub use store::SnapshotStore;
