//! Version control engine for docvault.
//!
//! This crate ties the pieces together:
//! - [`model`]: document and version records
//! - [`ledger`]: the authoritative version list per document
//! - [`engine`]: create, switch, describe, delete and compare versions
//! - [`watch`] and [`reconciler`]: follow external renames and deletes
//! - [`config`]: storage location and watcher settings
//!
//! # Example
//!
//! ```no_run
//! use docvault_core::{Config, CreateOutcome, VersionControl};
//! use docvault_storage::json::metadata_storage;
//! use std::path::Path;
//!
//! # async fn example() -> docvault_core::VcResult<()> {
//! let config = Config::with_storage_root("/var/lib/docvault");
//! let storage = metadata_storage(&config.storage_root());
//! let engine = VersionControl::new(config, storage).await?;
//!
//! let document = engine.track_document(Path::new("report.txt")).await?;
//! if let CreateOutcome::Created(version) =
//!     engine.create_new_version(&document.id, Some("first draft".into())).await?
//! {
//!     println!("created {}", version.id);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod model;
pub mod reconciler;
pub mod watch;

pub use config::Config;
pub use engine::{CreateOutcome, DiffSource, SwitchOutcome, VersionControl};
pub use error::{VcError, VcResult};
pub use ledger::{Ledger, RecoveryReport};
pub use lock::{DocumentGuard, DocumentLocks};
pub use model::{Document, DocumentId, Version, VersionId};
pub use reconciler::{Reconciled, Reconciler};
pub use watch::{translate, FileWatcher, WatchEvent, WatchEvents, WatchHandle};
