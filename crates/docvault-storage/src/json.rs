//! JSON file-based storage implementation.
//!
//! This storage backend stores each key as a separate JSON file.
//! Keys are mapped to file paths: `["versions", "doc_1", "ver_2"]` -> `versions/doc_1/ver_2.json`

use crate::{Batch, BatchOp, Storage, StorageError, StorageResult};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// JSON file-based storage.
#[derive(Debug, Clone)]
pub struct JsonStorage {
    base_path: PathBuf,
}

impl JsonStorage {
    /// Create a new JSON storage at the given base path.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Directory holding the records.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Get the file path for a key.
    fn key_to_path<S: AsRef<str>>(&self, key: &[S]) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::invalid_key("Key cannot be empty"));
        }

        // Validate key components (no path traversal)
        for component in key {
            let component = component.as_ref();
            if component.is_empty()
                || component.contains('/')
                || component.contains('\\')
                || component == "."
                || component == ".."
            {
                return Err(StorageError::invalid_key(format!(
                    "Invalid key component: {}",
                    component
                )));
            }
        }

        let mut path = self.base_path.clone();
        for component in key {
            path.push(component.as_ref());
        }
        path.set_extension("json");

        Ok(path)
    }

    /// Get the directory path for a prefix.
    fn prefix_to_dir(&self, prefix: &[&str]) -> PathBuf {
        let mut path = self.base_path.clone();
        for component in prefix {
            path.push(component);
        }
        path
    }

    async fn write_atomic(path: &Path, temp_path: &Path, content: &str) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(temp_path, content).await
    }

    async fn remove_file(path: &Path) -> std::io::Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// A staged batch operation with its resolved paths.
enum Staged {
    Put { temp: PathBuf, path: PathBuf },
    Delete { path: PathBuf },
}

#[async_trait]
impl Storage for JsonStorage {
    async fn read<T: DeserializeOwned + Send>(&self, key: &[&str]) -> StorageResult<Option<T>> {
        let path = self.key_to_path(key)?;
        debug!(path = %path.display(), "Reading from storage");

        match fs::read_to_string(&path).await {
            Ok(content) => {
                let value: T = serde_json::from_str(&content)?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn write<T: Serialize + Send + Sync>(
        &self,
        key: &[&str],
        value: &T,
    ) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        debug!(path = %path.display(), "Writing to storage");

        let content = serde_json::to_string_pretty(value)?;

        // Write to temp file, then rename
        let temp_path = path.with_extension("json.tmp");
        Self::write_atomic(&path, &temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        Ok(())
    }

    async fn remove(&self, key: &[&str]) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        debug!(path = %path.display(), "Removing from storage");
        Self::remove_file(&path).await?;
        Ok(())
    }

    async fn list(&self, prefix: &[&str]) -> StorageResult<Vec<Vec<String>>> {
        let dir = self.prefix_to_dir(prefix);
        debug!(path = %dir.display(), "Listing storage");

        let mut results = Vec::new();

        match fs::read_dir(&dir).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();

                    // Only include .json files
                    if path.extension().is_some_and(|ext| ext == "json") {
                        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                            let mut key: Vec<String> =
                                prefix.iter().map(|s| s.to_string()).collect();
                            key.push(stem.to_string());
                            results.push(key);
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::Io(e)),
        }

        results.sort();
        Ok(results)
    }

    async fn exists(&self, key: &[&str]) -> StorageResult<bool> {
        let path = self.key_to_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn apply(&self, batch: Batch) -> StorageResult<()> {
        let ops = batch.into_ops();
        let total = ops.len();

        // Resolve every key before touching the disk
        let mut staged = Vec::with_capacity(total);
        let mut pending = Vec::new();
        for (idx, op) in ops.into_iter().enumerate() {
            match op {
                BatchOp::Put { key, json } => {
                    let path = self.key_to_path(key.as_slice())?;
                    let temp = path.with_extension(format!("json.{idx}.tmp"));
                    pending.push((path.clone(), temp.clone(), json));
                    staged.push(Staged::Put { temp, path });
                }
                BatchOp::Delete { key } => {
                    let path = self.key_to_path(key.as_slice())?;
                    staged.push(Staged::Delete { path });
                }
            }
        }

        // Stage writes; nothing live has changed yet
        for (idx, (path, temp, json)) in pending.iter().enumerate() {
            if let Err(e) = Self::write_atomic(path, temp, json).await {
                for (_, temp, _) in &pending[..=idx] {
                    let _ = Self::remove_file(temp).await;
                }
                return Err(StorageError::Io(e));
            }
        }

        // Commit in order
        for (applied, op) in staged.iter().enumerate() {
            let result = match op {
                Staged::Put { temp, path } => fs::rename(temp, path).await,
                Staged::Delete { path } => Self::remove_file(path).await,
            };
            if let Err(source) = result {
                warn!(applied, total, error = %source, "Storage batch interrupted");
                for op in &staged[applied..] {
                    if let Staged::Put { temp, .. } = op {
                        let _ = Self::remove_file(temp).await;
                    }
                }
                return Err(StorageError::PartialBatch {
                    applied,
                    total,
                    source,
                });
            }
        }

        debug!(operations = total, "Applied storage batch");
        Ok(())
    }
}

/// Create the metadata store that lives under a storage root.
pub fn metadata_storage(storage_root: &Path) -> JsonStorage {
    JsonStorage::new(storage_root.join("metadata"))
}
