//! Persisted hash index.
//!
//! Maps each asset path to the content hash of the bytes last committed to
//! the [`ContentStore`](super::ContentStore). The whole map is stored as one
//! flat JSON object under [`INDEX_KEY`] in the shared medium.
//!
//! The index only ever moves forward through [`HashIndex::commit`], which the
//! cache writer calls after the content write succeeded. If persisting the
//! updated map fails, the in-memory entry is rolled back so memory and medium
//! never disagree.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::traits::{Storage, StorageError};

/// Medium key holding the serialized index.
pub const INDEX_KEY: &str = "index:hashes";

/// Path → last-known-good content hash.
pub struct HashIndex {
    storage: Arc<dyn Storage>,

    /// Held across persistence so snapshots are written in commit order.
    entries: Mutex<BTreeMap<String, String>>,
}

impl std::fmt::Debug for HashIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashIndex").finish_non_exhaustive()
    }
}

impl HashIndex {
    /// Load the index from the medium.
    ///
    /// A missing record yields an empty index. A record that isn't a valid
    /// JSON string map is discarded with a warning; every asset is then
    /// treated as stale and re-downloaded.
    ///
    /// # Errors
    ///
    /// Fails only when the medium itself cannot be read.
    pub async fn load(storage: Arc<dyn Storage>) -> Result<Self, StorageError> {
        let entries = match storage.get(INDEX_KEY).await? {
            None => BTreeMap::new(),
            Some(raw) => match serde_json::from_slice::<BTreeMap<String, String>>(&raw) {
                Ok(map) => map,
                Err(e) => {
                    warn!(error = %e, "Error reading hash index, starting empty");
                    BTreeMap::new()
                }
            },
        };

        debug!(entries = entries.len(), "Loaded hash index");

        Ok(Self {
            storage,
            entries: Mutex::new(entries),
        })
    }

    /// Hash recorded for `path`, if any.
    pub async fn get(&self, path: &str) -> Option<String> {
        self.entries.lock().await.get(path).cloned()
    }

    /// Copy of the whole index.
    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.lock().await.clone()
    }

    /// Number of recorded paths.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the index is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Record `hash` for `path` and persist the index.
    ///
    /// # Errors
    ///
    /// If the medium rejects the write, the previous entry is restored and
    /// the storage error returned.
    pub async fn commit(&self, path: &str, hash: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        let previous = entries.insert(path.to_string(), hash.to_string());

        if let Err(e) = Self::persist(self.storage.as_ref(), &entries).await {
            match previous {
                Some(old) => entries.insert(path.to_string(), old),
                None => entries.remove(path),
            };
            return Err(e);
        }

        Ok(())
    }

    /// Drop every entry and the persisted record.
    pub async fn clear(&self) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        self.storage.delete(INDEX_KEY).await?;
        entries.clear();
        Ok(())
    }

    async fn persist(
        storage: &dyn Storage,
        entries: &BTreeMap<String, String>,
    ) -> Result<(), StorageError> {
        let raw = serde_json::to_vec(entries).map_err(|e| StorageError::Corrupt {
            key: INDEX_KEY.to_string(),
            reason: e.to_string(),
        })?;
        storage.set(INDEX_KEY, raw).await
    }
}
