//! Docvault - version control for ordinary documents.
//!
//! This is the main entry point for the docvault CLI.

mod commands;

use clap::{Parser, Subcommand};
use commands::*;
use docvault_core::Config;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "docvault")]
#[command(author, version, about = "Version control for ordinary documents", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory to read docvault.json from (defaults to the current directory)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Storage root, overriding configuration
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking a file
    Track {
        /// File to track
        path: PathBuf,
    },
    /// List tracked documents
    List,
    /// List a document's versions, newest first
    Versions {
        /// Document id or working file path
        document: String,
    },
    /// Create a version if the working file changed
    Commit {
        /// Document id or working file path
        document: String,
        /// Version description
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Restore a version into the working file
    Switch {
        /// Document id or working file path
        document: String,
        /// Version id to restore
        version: String,
        /// Delete every version newer than the restored one
        #[arg(long, conflicts_with = "as_latest", required_unless_present = "as_latest")]
        discard_newer: bool,
        /// Keep history and save the restored content as a new version
        #[arg(long)]
        as_latest: bool,
        /// Description for the restored version
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Set or clear a version's description
    Describe {
        /// Version id
        version: String,
        /// New description (omit to clear)
        text: Option<String>,
    },
    /// Show differences between versions, documents or files
    Diff {
        /// Version id, document, or file. Alone, compares a document's
        /// latest version with its working file.
        from: String,
        /// Version id, document, or file
        to: Option<String>,
        /// Print a unified diff instead of tagged lines
        #[arg(short, long)]
        unified: bool,
    },
    /// Delete a single version
    RmVersion {
        /// Version id
        version: String,
    },
    /// Stop tracking a document and delete its versions
    Untrack {
        /// Document id or working file path
        document: String,
    },
    /// Point a document at a new working file
    Relink {
        /// Document id
        document: String,
        /// New location of the working file
        path: PathBuf,
    },
    /// Report documents whose working file is missing
    Check {
        /// Remove missing documents and their versions
        #[arg(long)]
        remove: bool,
    },
    /// Follow renames and deletes of tracked files until stopped
    Watch,
    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("docvault {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config_dir = match &cli.config_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let (mut config, sources) = Config::load(Some(&config_dir)).await?;
    if let Some(storage) = &cli.storage {
        config.storage_root = Some(storage.clone());
    }

    let foreground = matches!(cli.command, Commands::Watch);
    let log_file = init_logging(cli.verbose, foreground, config.log_level.as_deref());
    if let Some(path) = &log_file {
        tracing::debug!(path = %path.display(), "Logging to file");
    }
    for source in &sources {
        tracing::debug!(path = %source.display(), "Loaded config");
    }

    if foreground {
        return handle_watch(&config).await;
    }

    let engine = Arc::new(open_engine(&config, None).await?);
    match cli.command {
        Commands::Track { path } => handle_track(&engine, &path).await,
        Commands::List => handle_list(&engine).await,
        Commands::Versions { document } => handle_versions(&engine, &document).await,
        Commands::Commit { document, message } => {
            handle_commit(&engine, &document, message).await
        }
        Commands::Switch {
            document,
            version,
            discard_newer: _,
            as_latest,
            message,
        } => {
            let mode = if as_latest {
                SwitchMode::AsLatest
            } else {
                SwitchMode::DiscardNewer
            };
            handle_switch(&engine, &document, &version, mode, message).await
        }
        Commands::Describe { version, text } => handle_describe(&engine, &version, text).await,
        Commands::Diff { from, to, unified } => {
            handle_diff(&engine, &from, to.as_deref(), unified).await
        }
        Commands::RmVersion { version } => handle_rm_version(&engine, &version).await,
        Commands::Untrack { document } => handle_untrack(&engine, &document).await,
        Commands::Relink { document, path } => handle_relink(&engine, &document, &path).await,
        Commands::Check { remove } => handle_check(Arc::clone(&engine), remove).await,
        Commands::Watch | Commands::Version => Ok(()),
    }
}
