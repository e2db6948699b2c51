//! Core traits for the durable key-value medium.
//!
//! The `Storage` trait is the lowest layer of the local cache: a flat
//! string-keyed byte store. The content store and the hash index both sit on
//! top of it, each in its own key namespace, so a single medium can be shared
//! with other consumers.
//!
//! # Design Principles
//!
//! - **String keys**: Human-readable for debugging and namespacing
//! - **Vec<u8> values**: Raw bytes, compression is the caller's concern
//! - **Bounded**: Backends may enforce a byte quota and fail writes over it
//! - **Dyn-compatible**: Uses `Pin<Box<dyn Future>>` for trait object support
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use assetsync::store::{MemoryStorage, Storage};
//!
//! let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
//! storage.set("key", vec![1, 2, 3]).await?;
//! let value = storage.get("key").await?;
//! ```

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No value is stored under the key.
    #[error("no such file or directory '{key}'")]
    NotFound { key: String },

    /// Writing the value would exceed the medium's quota.
    #[error("storage quota exceeded writing '{key}': need {needed} bytes, {available} available")]
    QuotaExceeded {
        key: String,
        needed: u64,
        available: u64,
    },

    /// Stored bytes could not be decoded.
    #[error("corrupt value for '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    /// I/O error from a disk-backed medium.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The medium is not reachable.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Whether this error only means "no local copy".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Durable key-value medium.
///
/// Implementations must be `Send + Sync`; the loader shares one medium across
/// the content store, the hash index and concurrent hydration reads.
pub trait Storage: Send + Sync {
    /// Store a value, replacing any existing value under the key.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::QuotaExceeded` if the write does not fit,
    /// or `StorageError::Io` for backend failures.
    fn set(&self, key: &str, value: Vec<u8>) -> BoxFuture<'_, Result<(), StorageError>>;

    /// Retrieve a value by key.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(data))` if the key exists
    /// - `Ok(None)` if the key is not found
    /// - `Err(_)` if the medium failed
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, StorageError>>;

    /// Delete a value. Returns whether the key existed.
    fn delete(&self, key: &str) -> BoxFuture<'_, Result<bool, StorageError>>;

    /// Check if a key exists without reading the value.
    fn contains(&self, key: &str) -> BoxFuture<'_, Result<bool, StorageError>>;

    /// List every key starting with `prefix`, sorted.
    fn keys(&self, prefix: &str) -> BoxFuture<'_, Result<Vec<String>, StorageError>>;

    /// Bytes currently held by the medium.
    fn size_bytes(&self) -> u64;

    /// Configured byte quota, if any.
    fn quota_bytes(&self) -> Option<u64>;
}
