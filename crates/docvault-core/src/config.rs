//! Configuration management for docvault.
//!
//! Configuration is loaded from multiple sources and merged:
//! 1. Built-in defaults (storage under the platform data directory)
//! 2. Global config: `~/.config/docvault/docvault.json`
//! 3. Project config: `docvault.json` or `docvault.jsonc` in the given directory
//! 4. Environment overrides: `DOCVAULT_STORAGE_ROOT`, `DOCVAULT_SETTLE_MS`
//!
//! Files may contain `//` and `/* */` comments. A relative `storage_root`
//! in a file is taken relative to that file's directory; anywhere else it is
//! relative to the current directory.

use crate::{VcError, VcResult};
use docvault_util::path;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default delay before a filesystem event is applied.
pub const DEFAULT_SETTLE_MS: u64 = 250;

const CONFIG_NAMES: &[&str] = &["docvault.jsonc", "docvault.json"];

/// Engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding snapshots and metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<PathBuf>,

    /// How long raw filesystem events are held before being applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settle_delay_ms: Option<u64>,

    /// Whether to watch tracked files for external renames and deletes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch: Option<bool>,

    /// Log level name (`error`, `warn`, `info`, `debug`, `trace`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl Config {
    /// Configuration rooted at an explicit storage directory.
    pub fn with_storage_root(root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: Some(root.into()),
            ..Default::default()
        }
    }

    /// Load configuration from all sources.
    ///
    /// Returns the merged config and the files it was read from.
    pub async fn load(project_dir: Option<&Path>) -> VcResult<(Self, Vec<PathBuf>)> {
        let mut config = Config::default();
        let mut sources = Vec::new();

        if let Some(global_dir) = path::config_dir() {
            if let Some(found) = Self::first_existing(&global_dir) {
                config = config.merge(Self::load_file(&found).await?);
                sources.push(found);
            }
        }

        if let Some(dir) = project_dir {
            if let Some(found) = Self::first_existing(dir) {
                config = config.merge(Self::load_file(&found).await?);
                sources.push(found);
            }
        }

        let config = config.merge(Self::from_env()?);
        Ok((config, sources))
    }

    /// Load configuration from a single file.
    pub async fn load_file(path: &Path) -> VcResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| VcError::io(path, e))?;
        let mut config = Self::parse_jsonc(&content, &path.display().to_string())?;

        if let (Some(root), Some(dir)) = (&config.storage_root, path.parent()) {
            if root.is_relative() {
                config.storage_root = Some(path::normalize(&dir.join(root)));
            }
        }
        Ok(config)
    }

    /// Overrides taken from `DOCVAULT_*` environment variables.
    pub fn from_env() -> VcResult<Self> {
        let mut config = Config::default();

        if let Some(root) = std::env::var_os("DOCVAULT_STORAGE_ROOT") {
            if !root.is_empty() {
                config.storage_root = Some(PathBuf::from(root));
            }
        }

        if let Ok(value) = std::env::var("DOCVAULT_SETTLE_MS") {
            let ms = value.trim().parse::<u64>().map_err(|e| VcError::Config {
                path: "DOCVAULT_SETTLE_MS".to_string(),
                message: e.to_string(),
            })?;
            config.settle_delay_ms = Some(ms);
        }

        Ok(config)
    }

    /// Merge with another config, preferring values from `other` if present.
    pub fn merge(mut self, other: Self) -> Self {
        if other.storage_root.is_some() {
            self.storage_root = other.storage_root;
        }
        if other.settle_delay_ms.is_some() {
            self.settle_delay_ms = other.settle_delay_ms;
        }
        if other.watch.is_some() {
            self.watch = other.watch;
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
        self
    }

    /// The absolute storage root, falling back to the platform data
    /// directory.
    pub fn storage_root(&self) -> PathBuf {
        let root = self
            .storage_root
            .clone()
            .or_else(path::data_dir)
            .unwrap_or_else(|| PathBuf::from(".docvault"));
        path::absolutize(&root).unwrap_or(root)
    }

    /// Directory holding snapshot files.
    pub fn snapshot_dir(&self) -> PathBuf {
        self.storage_root().join("snapshots")
    }

    /// Directory holding metadata records.
    pub fn metadata_dir(&self) -> PathBuf {
        self.storage_root().join("metadata")
    }

    /// Directory holding the per-document lock files.
    pub fn lock_dir(&self) -> PathBuf {
        self.storage_root().join("locks")
    }

    /// Settle delay for filesystem events.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms.unwrap_or(DEFAULT_SETTLE_MS))
    }

    /// Whether the file watcher is enabled.
    pub fn watch_enabled(&self) -> bool {
        self.watch.unwrap_or(true)
    }

    fn first_existing(dir: &Path) -> Option<PathBuf> {
        CONFIG_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.exists())
    }

    /// Parse JSONC (JSON with comments).
    fn parse_jsonc(content: &str, source: &str) -> VcResult<Self> {
        let stripped = Self::strip_comments(content);
        serde_json::from_str(&stripped).map_err(|e| VcError::Config {
            path: source.to_string(),
            message: e.to_string(),
        })
    }

    /// Strip JSON comments.
    fn strip_comments(input: &str) -> String {
        let mut result = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();
        let mut in_string = false;
        let mut escape_next = false;

        while let Some(c) = chars.next() {
            if escape_next {
                result.push(c);
                escape_next = false;
                continue;
            }

            if in_string {
                match c {
                    '\\' => escape_next = true,
                    '"' => in_string = false,
                    _ => {}
                }
                result.push(c);
                continue;
            }

            if c == '"' {
                in_string = true;
                result.push(c);
                continue;
            }

            if c == '/' {
                match chars.peek() {
                    Some('/') => {
                        chars.next();
                        for c in chars.by_ref() {
                            if c == '\n' {
                                result.push('\n');
                                break;
                            }
                        }
                        continue;
                    }
                    Some('*') => {
                        chars.next();
                        let mut prev = ' ';
                        for c in chars.by_ref() {
                            if prev == '*' && c == '/' {
                                break;
                            }
                            // Keep line numbers stable for parse errors
                            if c == '\n' {
                                result.push('\n');
                            }
                            prev = c;
                        }
                        continue;
                    }
                    _ => {}
                }
            }

            result.push(c);
        }

        result
    }
}
