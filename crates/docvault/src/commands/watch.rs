//! The `watch` command: follow external renames and deletes until stopped.

use super::open_engine;
use docvault_core::{Config, FileWatcher, Reconciler};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Run the reconciler in the foreground until Ctrl+C.
pub async fn handle_watch(config: &Config) -> anyhow::Result<()> {
    if !config.watch_enabled() {
        anyhow::bail!("File watching is disabled in the configuration");
    }

    let (watcher, events) = FileWatcher::new(config.settle_delay())?;
    let engine = Arc::new(open_engine(config, Some(Arc::new(watcher))).await?);
    let reconciler = Reconciler::new(Arc::clone(&engine), events);

    let missing = reconciler.start().await?;
    for document in &missing {
        println!(
            "Missing: {} ({}) was at {}",
            document.name,
            document.id,
            document.working_path.display()
        );
    }

    let watched = engine.watcher().map(|w| w.watched().len()).unwrap_or(0);
    println!("Watching {watched} documents. Press Ctrl+C to stop.");

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stopping watcher");
            stop.cancel();
        }
    });

    reconciler.run(cancel).await?;
    Ok(())
}
