//! Content store: the asset pseudo-filesystem.
//!
//! Asset bytes are kept in a [`Storage`] medium under a fixed namespace
//! (`assets:{path}`), zlib-compressed. The namespace is flat: there are no
//! directories, so the directory helpers exist only to satisfy callers that
//! think in filesystem terms and never touch the medium.

use std::io::{Read, Write};
use std::sync::Arc;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::traits::{Storage, StorageError};

/// Key prefix separating asset values from other users of the medium.
pub const CONTENT_PREFIX: &str = "assets:";

/// Compressed, namespaced asset store.
#[derive(Clone)]
pub struct ContentStore {
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("size_bytes", &self.storage.size_bytes())
            .finish()
    }
}

impl ContentStore {
    /// Create a content store over the given medium.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn key(path: &str) -> String {
        format!("{}{}", CONTENT_PREFIX, path)
    }

    /// Whether a value is stored at `path`.
    pub async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        self.storage.contains(&Self::key(path)).await
    }

    /// Read the bytes stored at `path`.
    ///
    /// # Errors
    ///
    /// `StorageError::NotFound` when nothing is stored there, and
    /// `StorageError::Corrupt` when the stored value does not decompress.
    pub async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let key = Self::key(path);
        let compressed = self
            .storage
            .get(&key)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                key: path.to_string(),
            })?;

        decompress(&compressed).map_err(|e| StorageError::Corrupt {
            key: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Write `bytes` at `path`, replacing any previous value.
    pub async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let compressed = compress(bytes)?;
        tracing::trace!(
            path = %path,
            raw = bytes.len(),
            stored = compressed.len(),
            "Writing content"
        );
        self.storage.set(&Self::key(path), compressed).await
    }

    /// Remove the value at `path`. Returns whether one existed.
    pub async fn remove(&self, path: &str) -> Result<bool, StorageError> {
        self.storage.delete(&Self::key(path)).await
    }

    /// Ensure a directory exists. The namespace is flat, so this is a no-op.
    pub async fn ensure_dir(&self, _path: &str) -> Result<(), StorageError> {
        Ok(())
    }

    /// Directory component of `path`, always empty in a flat namespace.
    pub fn dirname(_path: &str) -> &'static str {
        ""
    }

    /// Every asset path currently stored, sorted.
    pub async fn paths(&self) -> Result<Vec<String>, StorageError> {
        let keys = self.storage.keys(CONTENT_PREFIX).await?;
        Ok(keys
            .into_iter()
            .map(|k| k[CONTENT_PREFIX.len()..].to_string())
            .collect())
    }

    /// Remove every stored asset. Returns how many were removed.
    pub async fn clear(&self) -> Result<usize, StorageError> {
        let keys = self.storage.keys(CONTENT_PREFIX).await?;
        let mut removed = 0;
        for key in keys {
            if self.storage.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Bytes held by the underlying medium (all namespaces).
    pub fn medium_size_bytes(&self) -> u64 {
        self.storage.size_bytes()
    }
}

fn compress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn decompress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
