//! Logging initialization and configuration.
//!
//! Short-lived commands log to a file in the platform log directory so
//! their output stays clean. `watch` and `--verbose` log to stderr.

use docvault_util::log::{self, LogConfig, LogLevel};
use std::path::PathBuf;

/// Initialize logging. Returns the log file path if logging to a file.
pub fn init_logging(verbose: bool, foreground: bool, level: Option<&str>) -> Option<PathBuf> {
    let level = if verbose {
        LogLevel::Debug
    } else {
        level.and_then(LogLevel::parse).unwrap_or_default()
    };

    if verbose || foreground {
        let config = LogConfig {
            print: true,
            level,
            ..Default::default()
        };
        if let Err(e) = log::init(config) {
            eprintln!("Warning: Could not initialize logging: {e}");
        }
        return None;
    }

    let log_file = log::default_log_path()?;
    let config = LogConfig {
        level,
        file: Some(log_file.clone()),
        ..Default::default()
    };

    match log::init(config) {
        Ok(()) => Some(log_file),
        Err(e) => {
            eprintln!("Warning: Could not open log file: {e}");
            None
        }
    }
}
