//! Keeps tracked documents in step with the filesystem.
//!
//! The reconciler consumes the watcher's settled event stream in a single
//! loop and applies each [`WatchEvent`] under the affected document's lock:
//! - a rename moves the document to its new path and re-registers the watch
//! - a delete removes the document with all its versions
//!
//! Events are checked against the disk before being applied. Events for
//! paths no document is tracked at are ignored, and so are renames into the
//! engine's own storage.

use crate::engine::{VersionControl, CATALOG_LOCK};
use crate::model::Document;
use crate::watch::{WatchEvent, WatchEvents};
use crate::{VcError, VcResult};
use docvault_storage::Storage;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What applying one event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// The document now points at its new path.
    Moved(Document),
    /// The document and its versions were removed.
    Removed(Document),
    /// Nothing to do: unknown path, or the disk no longer matches the event.
    Ignored,
}

/// Applies filesystem events to the engine's catalog.
pub struct Reconciler<S> {
    engine: Arc<VersionControl<S>>,
    events: Option<WatchEvents>,
}

impl<S: Storage> Reconciler<S> {
    /// Create a reconciler fed by a watcher's event stream.
    pub fn new(engine: Arc<VersionControl<S>>, events: WatchEvents) -> Self {
        Self {
            engine,
            events: Some(events),
        }
    }

    /// Create a reconciler without an event stream. Events are applied
    /// through [`Self::handle_event`] only.
    pub fn detached(engine: Arc<VersionControl<S>>) -> Self {
        Self {
            engine,
            events: None,
        }
    }

    /// Startup pass: watch every document whose working file exists and
    /// return the ones whose file is gone.
    ///
    /// Missing documents are left untouched; the caller decides whether to
    /// relink or delete them.
    pub async fn start(&self) -> VcResult<Vec<Document>> {
        let mut missing = Vec::new();

        for document in self.engine.list_documents().await? {
            let exists = tokio::fs::try_exists(&document.working_path)
                .await
                .map_err(|e| VcError::io(&document.working_path, e))?;

            if !exists {
                warn!(
                    document = %document.id,
                    path = %document.working_path.display(),
                    "Working file is missing"
                );
                missing.push(document);
                continue;
            }

            if let Some(watcher) = self.engine.watcher() {
                if let Err(e) = watcher.watch(&document.working_path) {
                    warn!(document = %document.id, error = %e, "Could not watch file");
                }
            }
        }

        info!(missing = missing.len(), "Reconciler started");
        Ok(missing)
    }

    /// Process events until cancelled or the watcher goes away.
    pub async fn run(mut self, cancel: CancellationToken) -> VcResult<()> {
        let mut events = self
            .events
            .take()
            .ok_or_else(|| VcError::Watch("reconciler has no event stream".to_string()))?;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Reconciler cancelled");
                    break;
                }
                received = events.recv() => match received {
                    Some(event) => event,
                    None => {
                        debug!("Watcher event stream closed");
                        break;
                    }
                },
            };

            if let Err(e) = self.handle_event(event.clone()).await {
                error!(?event, error = %e, "Failed to apply file event");
            }
        }

        Ok(())
    }

    /// Apply one settled event.
    pub async fn handle_event(&self, event: WatchEvent) -> VcResult<Reconciled> {
        match event {
            WatchEvent::Renamed { old, new } => self.handle_rename(&old, &new).await,
            WatchEvent::Deleted { path } => self.handle_delete(&path).await,
        }
    }

    async fn handle_rename(&self, old: &Path, new: &Path) -> VcResult<Reconciled> {
        if self.engine.in_storage(new) {
            warn!(old = %old.display(), new = %new.display(), "Ignoring rename into storage");
            return Ok(Reconciled::Ignored);
        }

        // Save-by-rename puts a file back at the old path
        if exists(old).await? || !exists(new).await? {
            debug!(old = %old.display(), new = %new.display(), "Rename superseded");
            return Ok(Reconciled::Ignored);
        }

        let Some(found) = self.engine.ledger().find_document_by_path(old).await? else {
            debug!(path = %old.display(), "Rename of untracked path");
            return Ok(Reconciled::Ignored);
        };

        let guard = self.engine.locks().lock(&found.id).await?;
        let Some(document) = self.current(&found.id, old).await? else {
            return Ok(Reconciled::Ignored);
        };

        // Held until the move lands so no track or relink can claim `new`
        let _catalog = self.engine.locks().lock(CATALOG_LOCK).await?;
        if let Some(other) = self.engine.ledger().find_document_by_path(new).await? {
            warn!(
                document = %document.id,
                other = %other.id,
                path = %new.display(),
                "Rename target is tracked by another document"
            );
            return Ok(Reconciled::Ignored);
        }

        let moved = self.engine.relocate_document(&guard, new).await?;
        info!(
            document = %moved.id,
            old = %old.display(),
            new = %new.display(),
            "Document moved"
        );
        Ok(Reconciled::Moved(moved))
    }

    async fn handle_delete(&self, path: &Path) -> VcResult<Reconciled> {
        if exists(path).await? {
            debug!(path = %path.display(), "Delete superseded");
            return Ok(Reconciled::Ignored);
        }

        let Some(found) = self.engine.ledger().find_document_by_path(path).await? else {
            debug!(path = %path.display(), "Delete of untracked path");
            return Ok(Reconciled::Ignored);
        };

        let guard = self.engine.locks().lock(&found.id).await?;
        let Some(document) = self.current(&found.id, path).await? else {
            return Ok(Reconciled::Ignored);
        };

        self.engine.purge_document(&guard, &document).await?;
        info!(
            document = %document.id,
            path = %path.display(),
            "Document removed after its file was deleted"
        );
        Ok(Reconciled::Removed(document))
    }

    /// Re-read a document under its lock; `None` if it was deleted or moved
    /// away from `path` in the meantime.
    async fn current(&self, document_id: &str, path: &Path) -> VcResult<Option<Document>> {
        match self.engine.ledger().find_document(document_id).await? {
            Some(document) if document.working_path == path => Ok(Some(document)),
            _ => {
                debug!(document = %document_id, "Document changed before event was applied");
                Ok(None)
            }
        }
    }
}

async fn exists(path: &Path) -> VcResult<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| VcError::io(path, e))
}
