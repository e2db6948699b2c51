//! Cache writer: persists fetched content, then advances the hash index.
//!
//! The content write always happens before the index update for the same
//! path, so a failed write never moves the index forward. Write failures
//! degrade the entry to memory-only instead of failing the session.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use super::downloader::DownloadResult;
use super::state::SyncSession;
use crate::error::SyncError;
use crate::store::{ContentStore, HashIndex};

/// What happened to one commit.
#[derive(Debug)]
pub enum CommitOutcome {
    /// Content and index entry persisted.
    Cached,
    /// Persisting failed; the content lives in memory for this session only.
    MemoryOnly(SyncError),
    /// Local caching is disabled.
    Skipped,
    /// The path was already committed earlier in this session.
    AlreadyCommitted,
}

impl CommitOutcome {
    /// Whether the content is now in the store.
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached | Self::AlreadyCommitted)
    }
}

/// Writes verified content to the [`ContentStore`] and [`HashIndex`].
#[derive(Clone)]
pub struct CacheWriter {
    store: ContentStore,
    index: Arc<HashIndex>,
    use_local_cache: bool,
}

impl CacheWriter {
    pub fn new(store: ContentStore, index: Arc<HashIndex>, use_local_cache: bool) -> Self {
        Self {
            store,
            index,
            use_local_cache,
        }
    }

    /// Persist `bytes` under `path` and record `hash` for it.
    pub async fn commit(
        &self,
        path: &str,
        bytes: &[u8],
        hash: &str,
        session: &SyncSession,
    ) -> CommitOutcome {
        if !self.use_local_cache {
            return CommitOutcome::Skipped;
        }
        if !session.claim_commit(path) {
            return CommitOutcome::AlreadyCommitted;
        }

        if let Err(source) = self.store.write(path, bytes).await {
            warn!(path = %path, error = %source, "Cache write failed, keeping asset in memory");
            return CommitOutcome::MemoryOnly(SyncError::StorageWriteFailure {
                path: path.to_string(),
                source,
            });
        }

        if let Err(source) = self.index.commit(path, hash).await {
            warn!(path = %path, error = %source, "Hash index update failed, keeping asset in memory");
            // The index still names the old hash; drop content it doesn't describe.
            if let Err(e) = self.store.remove(path).await {
                warn!(path = %path, error = %e, "Failed to remove unindexed content");
            }
            return CommitOutcome::MemoryOnly(SyncError::StorageWriteFailure {
                path: path.to_string(),
                source,
            });
        }

        debug!(path = %path, hash = %hash, "Cached asset");
        CommitOutcome::Cached
    }

    /// Commit every download, returning `(path, outcome)` in input order.
    pub async fn commit_all(
        &self,
        results: &[DownloadResult],
        session: &SyncSession,
    ) -> Vec<(String, CommitOutcome)> {
        let commits = results.iter().map(|r| async move {
            let outcome = self
                .commit(&r.entry.path, &r.bytes, &r.verified_hash, session)
                .await;
            (r.entry.path.clone(), outcome)
        });
        join_all(commits).await
    }
}
