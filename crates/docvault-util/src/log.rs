//! Tracing subscriber setup shared by the docvault binaries and tests.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{fmt as tracing_fmt, prelude::*, EnvFilter};

/// Verbosity of the docvault log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    const ALL: [LogLevel; 5] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
    ];

    /// Directive understood by `EnvFilter`.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Case-insensitive parse; `warning` is accepted for `warn`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s == "warning" {
            return Some(LogLevel::Warn);
        }
        Self::ALL.into_iter().find(|level| level.as_str() == s)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how much to log.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Write to stderr. Ignored when `file` is set.
    pub print: bool,
    pub level: LogLevel,
    /// Include source file and line in each record.
    pub include_location: bool,
    /// Append to this file instead of printing.
    pub file: Option<PathBuf>,
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `config.level`. With neither `file` nor `print`
/// set, events are filtered but not written anywhere.
pub fn init(config: LogConfig) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));
    let location = config.include_location;

    let file_layer = match &config.file {
        Some(path) => Some(
            tracing_fmt::layer()
                .with_ansi(false)
                .with_file(location)
                .with_line_number(location)
                .with_writer(Mutex::new(open_append(path)?)),
        ),
        None => None,
    };
    let stderr_layer = (config.print && config.file.is_none()).then(|| {
        tracing_fmt::layer()
            .with_file(location)
            .with_line_number(location)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
    Ok(())
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// `docvault.log` inside the platform log directory.
pub fn default_log_path() -> Option<PathBuf> {
    crate::path::logs_dir().map(|dir| dir.join("docvault.log"))
}
