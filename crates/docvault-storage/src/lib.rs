//! Metadata storage layer for docvault.
//!
//! This crate provides the record store the version ledger writes through:
//! - JSON file storage (default)
//! - In-memory storage (for testing)
//!
//! Multi-record updates go through [`Batch`] so that a backend can apply
//! them as one unit.

pub mod batch;
pub mod error;
pub mod json;
pub mod memory;

pub use batch::{Batch, BatchOp};
pub use error::{StorageError, StorageResult};
pub use json::JsonStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// A trait for key-value storage backends.
///
/// Keys are represented as path segments, e.g., `["versions", "doc_01h...", "ver_01h..."]`.
/// Values are serialized/deserialized as JSON.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a value from storage.
    ///
    /// Returns `None` if the key doesn't exist.
    async fn read<T: DeserializeOwned + Send>(&self, key: &[&str]) -> StorageResult<Option<T>>;

    /// Write a single value to storage.
    async fn write<T: Serialize + Send + Sync>(&self, key: &[&str], value: &T)
        -> StorageResult<()>;

    /// Remove a value from storage. Removing a missing key is not an error.
    async fn remove(&self, key: &[&str]) -> StorageResult<()>;

    /// List all keys directly under a prefix.
    ///
    /// Returns the full key paths for each item.
    async fn list(&self, prefix: &[&str]) -> StorageResult<Vec<Vec<String>>>;

    /// Check if a key exists.
    async fn exists(&self, key: &[&str]) -> StorageResult<bool>;

    /// Apply every operation in `batch`.
    ///
    /// Backends apply the batch all-or-nothing where they can. The JSON
    /// backend stages every write before touching a live record, so a failure
    /// while staging leaves storage untouched; a failure during the final
    /// renames can leave a prefix of the batch applied.
    async fn apply(&self, batch: Batch) -> StorageResult<()>;
}
