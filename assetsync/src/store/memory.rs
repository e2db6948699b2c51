//! In-memory storage medium.
//!
//! Backed by a `DashMap` so reads from concurrent hydration tasks don't
//! contend. An optional byte quota models size-limited media: a write that
//! would push the total over the quota is rejected and leaves the previous
//! value in place.

use dashmap::DashMap;
use parking_lot::Mutex;

use super::traits::{BoxFuture, Storage, StorageError};

/// In-memory key-value medium with an optional quota.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: DashMap<String, Vec<u8>>,

    /// Bytes held, counting keys and values. Guarded so quota checks and
    /// the matching insert happen atomically.
    used: Mutex<u64>,

    quota: Option<u64>,
}

impl MemoryStorage {
    /// Create an unbounded memory medium.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a memory medium that holds at most `quota` bytes.
    pub fn with_quota(quota: u64) -> Self {
        Self {
            quota: Some(quota),
            ..Self::default()
        }
    }

    /// Number of keys stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the medium holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn weight(key: &str, value: &[u8]) -> u64 {
        (key.len() + value.len()) as u64
    }

    fn store(&self, key: String, value: Vec<u8>) -> Result<(), StorageError> {
        let mut used = self.used.lock();
        let previous = self
            .entries
            .get(&key)
            .map(|v| Self::weight(&key, v.value()))
            .unwrap_or(0);
        let incoming = Self::weight(&key, &value);
        let projected = *used - previous + incoming;

        if let Some(quota) = self.quota {
            if projected > quota {
                return Err(StorageError::QuotaExceeded {
                    key,
                    needed: incoming,
                    available: quota.saturating_sub(*used - previous),
                });
            }
        }

        self.entries.insert(key, value);
        *used = projected;
        Ok(())
    }

    fn remove(&self, key: &str) -> bool {
        let mut used = self.used.lock();
        match self.entries.remove(key) {
            Some((k, v)) => {
                *used -= Self::weight(&k, &v);
                true
            }
            None => false,
        }
    }
}

impl Storage for MemoryStorage {
    fn set(&self, key: &str, value: Vec<u8>) -> BoxFuture<'_, Result<(), StorageError>> {
        let key = key.to_string();
        Box::pin(async move { self.store(key, value) })
    }

    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, StorageError>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.entries.get(&key).map(|v| v.value().clone())) })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<bool, StorageError>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.remove(&key)) })
    }

    fn contains(&self, key: &str) -> BoxFuture<'_, Result<bool, StorageError>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.entries.contains_key(&key)) })
    }

    fn keys(&self, prefix: &str) -> BoxFuture<'_, Result<Vec<String>, StorageError>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            let mut keys: Vec<String> = self
                .entries
                .iter()
                .filter(|e| e.key().starts_with(&prefix))
                .map(|e| e.key().clone())
                .collect();
            keys.sort();
            Ok(keys)
        })
    }

    fn size_bytes(&self) -> u64 {
        *self.used.lock()
    }

    fn quota_bytes(&self) -> Option<u64> {
        self.quota
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let storage = MemoryStorage::new();
        storage.set("a", vec![1, 2, 3]).await.unwrap();

        assert_eq!(storage.get("a").await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(storage.get("missing").await.unwrap(), None);
        assert!(storage.contains("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_size_tracks_replacement_and_delete() {
        let storage = MemoryStorage::new();
        storage.set("k", vec![0; 10]).await.unwrap();
        assert_eq!(storage.size_bytes(), 11);

        storage.set("k", vec![0; 4]).await.unwrap();
        assert_eq!(storage.size_bytes(), 5);

        assert!(storage.delete("k").await.unwrap());
        assert!(!storage.delete("k").await.unwrap());
        assert_eq!(storage.size_bytes(), 0);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_quota_rejects_and_keeps_previous_value() {
        let storage = MemoryStorage::with_quota(20);
        storage.set("k", vec![1; 10]).await.unwrap();

        let err = storage.set("k2", vec![2; 15]).await.unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { .. }));
        assert_eq!(storage.get("k2").await.unwrap(), None);
        assert_eq!(storage.get("k").await.unwrap(), Some(vec![1; 10]));
        assert_eq!(storage.quota_bytes(), Some(20));
    }

    #[tokio::test]
    async fn test_quota_counts_replaced_value_as_freed() {
        let storage = MemoryStorage::with_quota(12);
        storage.set("k", vec![1; 10]).await.unwrap();
        // 11 bytes in use; replacing with 11 bytes fits because the old value goes.
        storage.set("k", vec![2; 11]).await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), Some(vec![2; 11]));
    }

    #[tokio::test]
    async fn test_keys_filtered_and_sorted() {
        let storage = MemoryStorage::new();
        storage.set("assets:b.js", vec![]).await.unwrap();
        storage.set("assets:a.css", vec![]).await.unwrap();
        storage.set("index:hashes", vec![]).await.unwrap();

        let keys = storage.keys("assets:").await.unwrap();
        assert_eq!(keys, vec!["assets:a.css", "assets:b.js"]);
        assert_eq!(storage.len(), 3);
    }
}
