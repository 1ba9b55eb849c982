//! Volatile storage backend used by unit tests.

use crate::{Batch, BatchOp, Storage, StorageError, StorageResult};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

type Records = BTreeMap<String, String>;

/// Keeps records as JSON strings in a sorted map.
///
/// A batch runs under one write guard, so readers never observe it half
/// applied.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: RwLock<Records>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn join<S: AsRef<str>>(key: &[S]) -> String {
        let parts: Vec<&str> = key.iter().map(AsRef::as_ref).collect();
        parts.join("/")
    }

    fn reader(&self) -> StorageResult<RwLockReadGuard<'_, Records>> {
        self.records
            .read()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))
    }

    fn writer(&self) -> StorageResult<RwLockWriteGuard<'_, Records>> {
        self.records
            .write()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read<T: DeserializeOwned + Send>(&self, key: &[&str]) -> StorageResult<Option<T>> {
        let records = self.reader()?;
        records
            .get(&Self::join(key))
            .map(|json| serde_json::from_str(json))
            .transpose()
            .map_err(StorageError::from)
    }

    async fn write<T: Serialize + Send + Sync>(
        &self,
        key: &[&str],
        value: &T,
    ) -> StorageResult<()> {
        let json = serde_json::to_string(value)?;
        self.writer()?.insert(Self::join(key), json);
        Ok(())
    }

    async fn remove(&self, key: &[&str]) -> StorageResult<()> {
        self.writer()?.remove(&Self::join(key));
        Ok(())
    }

    async fn list(&self, prefix: &[&str]) -> StorageResult<Vec<Vec<String>>> {
        let mut scope = Self::join(prefix);
        if !scope.is_empty() {
            scope.push('/');
        }

        let records = self.reader()?;
        let children = records
            .range(scope.clone()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(&scope))
            .filter(|key| !key[scope.len()..].is_empty() && !key[scope.len()..].contains('/'))
            .map(|key| key.split('/').map(str::to_string).collect())
            .collect();
        Ok(children)
    }

    async fn exists(&self, key: &[&str]) -> StorageResult<bool> {
        Ok(self.reader()?.contains_key(&Self::join(key)))
    }

    async fn apply(&self, batch: Batch) -> StorageResult<()> {
        let mut records = self.writer()?;
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, json } => {
                    records.insert(Self::join(key.as_slice()), json);
                }
                BatchOp::Delete { key } => {
                    records.remove(&Self::join(key.as_slice()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
    struct TestData {
        name: String,
        value: i32,
    }

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryStorage::new();

        let data = TestData {
            name: "test".to_string(),
            value: 42,
        };

        storage.write(&["test", "data"], &data).await.unwrap();

        let read: Option<TestData> = storage.read(&["test", "data"]).await.unwrap();
        assert_eq!(read, Some(data.clone()));

        assert!(storage.exists(&["test", "data"]).await.unwrap());
        assert!(!storage.exists(&["nonexistent"]).await.unwrap());

        storage.remove(&["test", "data"]).await.unwrap();
        assert!(!storage.exists(&["test", "data"]).await.unwrap());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_memory_storage_list_excludes_nested() {
        let storage = MemoryStorage::new();

        let data = TestData::default();
        storage.write(&["project", "item1"], &data).await.unwrap();
        storage
            .write(&["project", "nested", "item"], &data)
            .await
            .unwrap();
        storage.write(&["projects", "other"], &data).await.unwrap();

        let items = storage.list(&["project"]).await.unwrap();
        assert_eq!(items, vec![vec!["project".to_string(), "item1".to_string()]]);
    }

    #[tokio::test]
    async fn test_memory_storage_list_empty_prefix() {
        let storage = MemoryStorage::new();

        let data = TestData::default();
        storage.write(&["item1"], &data).await.unwrap();
        storage.write(&["item2"], &data).await.unwrap();
        storage.write(&["dir", "item3"], &data).await.unwrap();

        let items = storage.list(&[]).await.unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_storage_apply() {
        let storage = MemoryStorage::new();
        storage.write(&["gone"], &TestData::default()).await.unwrap();

        let batch = Batch::new()
            .put(&["a"], &TestData::default())
            .unwrap()
            .put(&["b", "c"], &TestData::default())
            .unwrap()
            .delete(&["gone"]);
        storage.apply(batch).await.unwrap();

        assert!(storage.exists(&["a"]).await.unwrap());
        assert!(storage.exists(&["b", "c"]).await.unwrap());
        assert!(!storage.exists(&["gone"]).await.unwrap());
        assert_eq!(storage.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_storage_remove_nonexistent() {
        let storage = MemoryStorage::new();
        storage.remove(&["does", "not", "exist"]).await.unwrap();
    }
}
