//! In-memory storage backend.
//!
//! Data lives in a `BTreeMap` behind a `RwLock` and is lost when the process
//! exits. It is the default backend for local development and the backend
//! every test in the workspace runs against.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{StorageBackend, StorageError};

/// An in-memory storage backend backed by a `BTreeMap`.
///
/// Cloning shares the underlying map. Keys are kept sorted, so prefix
/// listing is a range scan.
///
/// # Examples
///
/// ```
/// # use iacforge_storage::{MemoryBackend, StorageBackend};
/// # #[tokio::main]
/// # async fn main() {
/// let backend = MemoryBackend::new();
/// backend.put("jobs/42", b"{}").await.unwrap();
/// assert!(backend.exists("jobs/42").await.unwrap());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether the backend holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.data
            .write()
            .await
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, StorageError> {
        let mut data = self.data.write().await;
        match data.entry(key.to_owned()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(value.to_vec());
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let data = self.data.read().await;
        let keys = data
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.data.read().await.contains_key(key))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("jobs/unknown").await.unwrap(), None);
        assert!(!backend.exists("jobs/unknown").await.unwrap());
    }

    #[tokio::test]
    async fn put_overwrites_existing_value() {
        let backend = MemoryBackend::new();
        backend.put("jobs/1", b"queued").await.unwrap();
        backend.put("jobs/1", b"running").await.unwrap();
        assert_eq!(
            backend.get("jobs/1").await.unwrap(),
            Some(b"running".to_vec())
        );
    }

    #[tokio::test]
    async fn put_if_absent_keeps_first_value() {
        let backend = MemoryBackend::new();
        assert!(backend.put_if_absent("artifacts/abc", b"first").await.unwrap());
        assert!(!backend.put_if_absent("artifacts/abc", b"second").await.unwrap());
        assert_eq!(
            backend.get("artifacts/abc").await.unwrap(),
            Some(b"first".to_vec())
        );
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.put("credentials/x", b"sealed").await.unwrap();
        backend.delete("credentials/x").await.unwrap();
        backend.delete("credentials/x").await.unwrap();
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn list_returns_only_prefixed_keys_in_order() {
        let backend = MemoryBackend::new();
        backend.put("jobs/b", b"2").await.unwrap();
        backend.put("jobs/a", b"1").await.unwrap();
        backend.put("artifacts/z", b"3").await.unwrap();

        let keys = backend.list("jobs/").await.unwrap();
        assert_eq!(keys, vec!["jobs/a", "jobs/b"]);
        assert!(backend.list("credentials/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let backend = MemoryBackend::new();
        let clone = backend.clone();
        backend.put("jobs/1", b"x").await.unwrap();
        assert_eq!(clone.len().await, 1);
    }
}
