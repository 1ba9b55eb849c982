//! Command handlers for the docvault CLI.
//!
//! This module contains handlers for the various CLI subcommands,
//! split into logical groups.

pub mod document;
pub mod logging;
pub mod version;
pub mod watch;

pub use document::*;
pub use logging::*;
pub use version::*;
pub use watch::*;

use docvault_core::{Config, Document, FileWatcher, VersionControl};
use docvault_storage::{json::metadata_storage, JsonStorage, Storage};
use docvault_util::{path::absolutize, IdPrefix, Identifier};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Engine type used by every command.
pub type Engine = VersionControl<JsonStorage>;

/// Open the engine over the configured storage root and repair any
/// metadata left behind by an interrupted run.
pub async fn open_engine(config: &Config, watcher: Option<Arc<FileWatcher>>) -> anyhow::Result<Engine> {
    let storage = metadata_storage(&config.storage_root());
    let mut engine = VersionControl::new(config.clone(), storage).await?;
    if let Some(watcher) = watcher {
        engine = engine.with_watcher(watcher);
    }

    let report = engine.recover().await?;
    if !report.is_clean() {
        info!(?report, "Repaired metadata on startup");
    }
    Ok(engine)
}

/// Find a document by id or by the path of its working file.
pub async fn resolve_document<S: Storage>(
    engine: &VersionControl<S>,
    arg: &str,
) -> anyhow::Result<Document> {
    if matches!(Identifier::parse(arg), Some((IdPrefix::Document, _))) {
        return Ok(engine.get_document(arg).await?);
    }

    let path = absolutize(Path::new(arg))?;
    engine
        .ledger()
        .find_document_by_path(&path)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Not tracked: {}", path.display()))
}

/// Shorten text to `width` characters for table output.
pub(crate) fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let head: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}
