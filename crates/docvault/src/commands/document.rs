//! Document command handlers.
//!
//! Handles tracking, listing, relinking and removing documents.

use super::{resolve_document, truncate, Engine};
use docvault_core::Reconciler;
use std::path::Path;
use std::sync::Arc;

/// Start tracking a file.
pub async fn handle_track(engine: &Engine, path: &Path) -> anyhow::Result<()> {
    let document = engine.track_document(path).await?;
    println!("Tracking {} as {}", document.working_path.display(), document.id);
    Ok(())
}

/// List tracked documents.
pub async fn handle_list(engine: &Engine) -> anyhow::Result<()> {
    let documents = engine.list_documents().await?;

    if documents.is_empty() {
        println!("No documents tracked.");
        return Ok(());
    }

    println!("{:<31} {:<24} {:>8} {:<20}", "ID", "NAME", "VERSIONS", "MODIFIED");
    println!("{}", "-".repeat(86));
    for document in documents {
        println!(
            "{:<31} {:<24} {:>8} {:<20}",
            document.id,
            truncate(&document.name, 24),
            document.version_count,
            document.modified_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

/// Stop tracking a document and delete its history.
pub async fn handle_untrack(engine: &Engine, document: &str) -> anyhow::Result<()> {
    let document = resolve_document(engine, document).await?;
    let removed = engine.delete_document(&document.id).await?;
    println!(
        "Stopped tracking {} ({} versions removed)",
        removed.name, removed.version_count
    );
    Ok(())
}

/// Point a document at a replacement file.
pub async fn handle_relink(engine: &Engine, document: &str, path: &Path) -> anyhow::Result<()> {
    let document = resolve_document(engine, document).await?;
    let relinked = engine.relink_document(&document.id, path).await?;
    println!(
        "Relinked {} to {}",
        relinked.id,
        relinked.working_path.display()
    );
    Ok(())
}

/// Report documents whose working file is gone, optionally removing them.
pub async fn handle_check(engine: Arc<Engine>, remove: bool) -> anyhow::Result<()> {
    let reconciler = Reconciler::detached(Arc::clone(&engine));
    let missing = reconciler.start().await?;

    if missing.is_empty() {
        println!("All tracked files are present.");
        return Ok(());
    }

    println!("Missing working files:");
    for document in &missing {
        println!(
            "  {}  {}  ({} versions)",
            document.id,
            document.working_path.display(),
            document.version_count
        );
    }

    if remove {
        for document in &missing {
            engine.delete_document(&document.id).await?;
        }
        println!("Removed {} documents.", missing.len());
    } else {
        println!();
        println!("Use `docvault relink <DOCUMENT> <PATH>` to point a document at its new location,");
        println!("or `docvault check --remove` to delete them.");
    }
    Ok(())
}
