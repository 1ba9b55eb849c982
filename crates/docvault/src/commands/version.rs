//! Version command handlers.
//!
//! Handles committing, listing, switching, describing, comparing and
//! deleting versions.

use super::{resolve_document, truncate, Engine};
use docvault_core::{CreateOutcome, DiffSource, SwitchOutcome, Version};
use docvault_snapshot::diff::{render_tagged, unified_diff};
use docvault_util::{path::absolutize, IdPrefix, Identifier};
use std::path::Path;

/// How `switch` treats the versions after the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchMode {
    /// Delete every newer version.
    DiscardNewer,
    /// Keep history and record the restored content as a new version.
    AsLatest,
}

/// List a document's versions, newest first.
pub async fn handle_versions(engine: &Engine, document: &str) -> anyhow::Result<()> {
    let document = resolve_document(engine, document).await?;
    let versions = engine.get_versions_by_document(&document.id).await?;

    println!("{} ({})", document.name, document.working_path.display());
    if versions.is_empty() {
        println!("No versions yet.");
        return Ok(());
    }

    println!();
    println!("{:<5} {:<31} {:<20} {:<30}", "#", "ID", "CREATED", "DESCRIPTION");
    println!("{}", "-".repeat(88));
    for version in versions {
        println!(
            "{:<5} {:<31} {:<20} {:<30}",
            version.ordinal,
            version.id,
            version.created_at.format("%Y-%m-%d %H:%M:%S"),
            truncate(version.description.as_deref().unwrap_or(""), 30)
        );
    }
    Ok(())
}

/// Snapshot a document if it changed.
pub async fn handle_commit(
    engine: &Engine,
    document: &str,
    message: Option<String>,
) -> anyhow::Result<()> {
    let document = resolve_document(engine, document).await?;
    match engine.create_new_version(&document.id, message).await? {
        CreateOutcome::Created(version) => print_created(&version),
        CreateOutcome::NoChange => println!("No changes since the latest version."),
    }
    Ok(())
}

/// Restore a version into the working copy.
pub async fn handle_switch(
    engine: &Engine,
    document: &str,
    version: &str,
    mode: SwitchMode,
    message: Option<String>,
) -> anyhow::Result<()> {
    let document = resolve_document(engine, document).await?;

    match mode {
        SwitchMode::DiscardNewer => {
            match engine
                .switch_to_version_and_delete_newer(&document.id, version, message)
                .await?
            {
                SwitchOutcome::Switched { target, pruned } => {
                    println!(
                        "Restored version #{} into {}",
                        target.ordinal,
                        document.working_path.display()
                    );
                    if !pruned.is_empty() {
                        println!("Discarded {} newer versions.", pruned.len());
                    }
                }
                SwitchOutcome::NothingToSwitch => {
                    println!("{} has no versions to switch to.", document.name);
                }
            }
        }
        SwitchMode::AsLatest => {
            match engine
                .switch_to_version_and_save_as_latest(&document.id, version, message)
                .await?
            {
                CreateOutcome::Created(created) => print_created(&created),
                CreateOutcome::NoChange => {
                    println!("Restored content already matches the latest version.")
                }
            }
        }
    }
    Ok(())
}

/// Set or clear a version's description.
pub async fn handle_describe(
    engine: &Engine,
    version: &str,
    text: Option<String>,
) -> anyhow::Result<()> {
    let updated = engine.change_version_description(version, text).await?;
    match &updated.description {
        Some(text) => println!("Version #{}: {}", updated.ordinal, text),
        None => println!("Cleared description of version #{}", updated.ordinal),
    }
    Ok(())
}

/// Delete one version.
pub async fn handle_rm_version(engine: &Engine, version: &str) -> anyhow::Result<()> {
    let removed = engine.delete_version(version).await?;
    println!("Deleted version #{} ({})", removed.ordinal, removed.id);
    Ok(())
}

/// Show the differences between two versions, documents or files.
///
/// With a single argument naming a document, compares its latest version
/// with the working copy.
pub async fn handle_diff(
    engine: &Engine,
    from: &str,
    to: Option<&str>,
    unified: bool,
) -> anyhow::Result<()> {
    let (old, new) = match to {
        Some(to) => (diff_source(engine, from).await?, diff_source(engine, to).await?),
        None => {
            let document = resolve_document(engine, from).await?;
            let latest = engine
                .get_latest(&document.id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("{} has no versions yet", document.name))?;
            (DiffSource::Version(latest), DiffSource::Working(document.id))
        }
    };

    if unified {
        let (old_label, old_text) = engine.resolve_text(&old).await?;
        let (new_label, new_text) = engine.resolve_text(&new).await?;
        print!("{}", unified_diff(&old_text, &new_text, &old_label, &new_label));
    } else {
        let lines = engine.get_version_difference(&old, &new).await?;
        print!("{}", render_tagged(&lines));
    }
    Ok(())
}

async fn diff_source(engine: &Engine, arg: &str) -> anyhow::Result<DiffSource> {
    match Identifier::parse(arg) {
        Some((IdPrefix::Version, _)) => return Ok(DiffSource::VersionId(arg.to_string())),
        Some((IdPrefix::Document, _)) => return Ok(DiffSource::Working(arg.to_string())),
        None => {}
    }

    let path = absolutize(Path::new(arg))?;
    match engine.ledger().find_document_by_path(&path).await? {
        Some(document) => Ok(DiffSource::Working(document.id)),
        None => Ok(DiffSource::Path(path)),
    }
}

fn print_created(version: &Version) {
    match &version.description {
        Some(text) => println!("Created version #{} ({}): {}", version.ordinal, version.id, text),
        None => println!("Created version #{} ({})", version.ordinal, version.id),
    }
}
