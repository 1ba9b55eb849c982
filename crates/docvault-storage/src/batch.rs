//! Multi-record write batches.

use crate::{StorageError, StorageResult};
use serde::Serialize;

/// A single operation inside a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Write the serialized JSON value under `key`.
    Put { key: Vec<String>, json: String },
    /// Remove `key` (missing keys are ignored).
    Delete { key: Vec<String> },
}

impl BatchOp {
    /// The key this operation targets.
    pub fn key(&self) -> &[String] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }
}

/// An ordered set of writes and removals applied as one unit.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a write. The value is serialized immediately.
    pub fn put<T: Serialize>(mut self, key: &[&str], value: &T) -> StorageResult<Self> {
        if key.is_empty() {
            return Err(StorageError::invalid_key("Key cannot be empty"));
        }
        let json = serde_json::to_string_pretty(value)?;
        self.ops.push(BatchOp::Put {
            key: owned(key),
            json,
        });
        Ok(self)
    }

    /// Queue a removal.
    pub fn delete(mut self, key: &[&str]) -> Self {
        self.ops.push(BatchOp::Delete { key: owned(key) });
        self
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch has no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Iterate over the queued operations in order.
    pub fn ops(&self) -> impl Iterator<Item = &BatchOp> {
        self.ops.iter()
    }

    /// Consume the batch, yielding its operations in order.
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

fn owned(key: &[&str]) -> Vec<String> {
    key.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_preserves_order() {
        let batch = Batch::new()
            .put(&["documents", "a"], &1)
            .unwrap()
            .delete(&["documents", "b"])
            .put(&["documents", "c"], &"x")
            .unwrap();

        let keys: Vec<String> = batch.ops().map(|op| op.key().join("/")).collect();
        assert_eq!(keys, vec!["documents/a", "documents/b", "documents/c"]);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn batch_rejects_empty_key() {
        assert!(Batch::new().put(&[], &1).is_err());
    }

    #[test]
    fn empty_batch() {
        assert!(Batch::new().is_empty());
    }
}
