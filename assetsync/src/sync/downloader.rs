//! Bounded-concurrency downloader for the diff set.
//!
//! Every entry is fetched through the [`Transport`] with at most
//! `max_concurrent` transfers outstanding; the rest wait on a FIFO semaphore.
//! Received bytes are credited to the session through a per-transfer
//! [`TransferProgress`] estimator.
//!
//! Failure policy:
//! - checksum mismatch: fatal, for optional entries too
//! - transport failure: fatal unless the entry is optional, in which case it
//!   is skipped with a warning

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::checksum::verify_checksum;
use super::progress::TransferProgress;
use super::state::SyncSession;
use super::transport::{asset_url, Transport, TransportError, TransportErrorKind};
use crate::config::DEFAULT_MAX_CONCURRENT_DOWNLOADS;
use crate::error::{SyncError, SyncResult};
use crate::manifest::ManifestEntry;

/// A fetched (and, if enabled, verified) asset.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    /// The manifest entry that was fetched.
    pub entry: ManifestEntry,
    /// Response body.
    pub bytes: Bytes,
    /// Reported content type, or the asset type's default.
    pub content_type: String,
    /// Hash to record for the entry. Computed from the body when checksums
    /// are on (and then equal to `entry.hash`), the declared hash otherwise.
    pub verified_hash: String,
}

/// An optional entry dropped after a transport failure.
#[derive(Debug)]
pub struct SkippedEntry {
    pub entry: ManifestEntry,
    pub error: SyncError,
}

/// Result of downloading a diff set.
#[derive(Debug, Default)]
pub struct DownloadOutcome {
    /// Fetched assets, in completion order.
    pub results: Vec<DownloadResult>,
    /// Optional entries that failed to fetch.
    pub skipped: Vec<SkippedEntry>,
}

enum EntryOutcome {
    Fetched(DownloadResult),
    Skipped(SkippedEntry),
}

/// Downloads manifest entries with a concurrency ceiling.
pub struct BoundedDownloader {
    transport: Arc<dyn Transport>,
    host: String,
    max_concurrent: usize,
    perform_checksum: bool,
}

impl BoundedDownloader {
    /// Create a downloader fetching from `host` with default settings.
    pub fn new(transport: Arc<dyn Transport>, host: impl Into<String>) -> Self {
        Self {
            transport,
            host: host.into(),
            max_concurrent: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            perform_checksum: true,
        }
    }

    /// Set the maximum number of simultaneous transfers (at least 1).
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    /// Enable or disable checksum verification.
    pub fn with_checksum(mut self, enabled: bool) -> Self {
        self.perform_checksum = enabled;
        self
    }

    /// Maximum simultaneous transfers.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Download every entry, crediting progress to `session`.
    ///
    /// The session's byte total is set to the sum of declared sizes before
    /// the first transfer starts.
    ///
    /// # Errors
    ///
    /// The first fatal failure. Transfers still queued are never started and
    /// those in flight are dropped.
    pub async fn download_all(
        &self,
        entries: Vec<ManifestEntry>,
        session: &SyncSession,
    ) -> SyncResult<DownloadOutcome> {
        let total: u64 = entries.iter().map(|e| e.size).sum();
        session.start_downloads(total);

        info!(
            files = entries.len(),
            total_bytes = total,
            max_concurrent = self.max_concurrent,
            "Starting downloads"
        );

        let semaphore = Semaphore::new(self.max_concurrent);
        let mut pending: FuturesUnordered<_> = entries
            .into_iter()
            .map(|entry| self.download_one(entry, &semaphore, session))
            .collect();

        let mut outcome = DownloadOutcome::default();
        while let Some(result) = pending.next().await {
            match result? {
                EntryOutcome::Fetched(r) => outcome.results.push(r),
                EntryOutcome::Skipped(s) => outcome.skipped.push(s),
            }
        }

        info!(
            fetched = outcome.results.len(),
            skipped = outcome.skipped.len(),
            loaded_bytes = session.loaded_bytes(),
            "Downloads complete"
        );
        Ok(outcome)
    }

    async fn download_one(
        &self,
        entry: ManifestEntry,
        semaphore: &Semaphore,
        session: &SyncSession,
    ) -> SyncResult<EntryOutcome> {
        let url = asset_url(&self.host, &entry.path, Some(&entry.hash));

        let _permit = semaphore.acquire().await.map_err(|_| SyncError::TransportFailure {
            path: entry.path.clone(),
            source: TransportError::new(&url, TransportErrorKind::Request)
                .with_detail("download queue closed"),
        })?;
        let _transfer = session.begin_transfer(&entry.path);

        debug!(path = %entry.path, url = %url, size = entry.size, "Fetching asset");

        let progress = Mutex::new(TransferProgress::new(entry.size));
        let on_progress = |loaded: u64, total: Option<u64>| {
            let delta = progress.lock().record(loaded, total);
            session.add_loaded(delta);
        };

        let response = match self.transport.fetch(&url, &on_progress).await {
            Ok(response) => response,
            Err(source) => {
                let error = SyncError::TransportFailure {
                    path: entry.path.clone(),
                    source,
                };
                if !entry.optional {
                    warn!(path = %entry.path, error = %error, "Download failed");
                    return Err(error);
                }
                warn!(path = %entry.path, error = %error, "Skipping optional asset");
                // Count the skipped bytes as done so the total is still reached.
                session.add_loaded(progress.lock().complete());
                return Ok(EntryOutcome::Skipped(SkippedEntry { entry, error }));
            }
        };
        session.add_loaded(progress.lock().complete());

        let verified_hash = if self.perform_checksum {
            verify_checksum(&entry.path, &response.bytes, &entry.hash).map_err(|e| {
                warn!(path = %entry.path, error = %e, "Integrity check failed");
                e
            })?
        } else {
            entry.hash.clone()
        };

        let content_type = response
            .content_type
            .unwrap_or_else(|| entry.asset_type.default_content_type().to_string());

        debug!(path = %entry.path, bytes = response.bytes.len(), "Fetched asset");

        Ok(EntryOutcome::Fetched(DownloadResult {
            entry,
            bytes: response.bytes,
            content_type,
            verified_hash,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::manifest::AssetType;
    use crate::sync::checksum::content_hash;
    use crate::sync::transport::mock::MockTransport;

    const HOST: &str = "https://assets.test";

    fn entry(path: &str, body: &[u8], optional: bool) -> ManifestEntry {
        ManifestEntry {
            path: path.to_string(),
            hash: content_hash(body),
            size: body.len() as u64,
            asset_type: AssetType::Script,
            optional,
        }
    }

    fn serve(transport: &MockTransport, path: &str, body: &[u8]) {
        transport.serve(&format!("{}/{}", HOST, path), body.to_vec());
    }

    #[tokio::test]
    async fn test_downloads_and_verifies() {
        let transport = Arc::new(MockTransport::new());
        serve(&transport, "a.js", b"alpha");
        serve(&transport, "b.js", b"bravo!");

        let downloader = BoundedDownloader::new(transport.clone(), HOST);
        let session = SyncSession::new();
        let outcome = downloader
            .download_all(
                vec![entry("a.js", b"alpha", false), entry("b.js", b"bravo!", false)],
                &session,
            )
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.skipped.is_empty());
        assert!(outcome
            .results
            .iter()
            .all(|r| r.verified_hash == content_hash(&r.bytes)));
        assert!(outcome
            .results
            .iter()
            .all(|r| r.content_type == "text/javascript"));
        assert_eq!(session.loaded_bytes(), 11);
        assert_eq!(session.total_bytes(), 11);

        let requests = transport.requests();
        assert!(requests.contains(&format!("{}/a.js?{}", HOST, content_hash(b"alpha"))));
    }

    #[tokio::test]
    async fn test_concurrency_ceiling() {
        let transport = Arc::new(MockTransport::new());
        let mut entries = Vec::new();
        for i in 0..20 {
            let path = format!("f{}.js", i);
            let body = format!("body {}", i);
            serve(&transport, &path, body.as_bytes());
            entries.push(entry(&path, body.as_bytes(), false));
        }

        let downloader = BoundedDownloader::new(transport.clone(), HOST).with_max_concurrent(5);
        let session = SyncSession::new();
        let outcome = downloader.download_all(entries, &session).await.unwrap();

        assert_eq!(outcome.results.len(), 20);
        assert!(session.peak_in_flight() <= 5);
        assert!(transport.peak_in_flight.load(Ordering::SeqCst) <= 5);
        assert_eq!(session.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_fatal() {
        let transport = Arc::new(MockTransport::new());
        serve(&transport, "a.js", b"tampered");

        let mut bad = entry("a.js", b"original", true);
        bad.size = 8;

        let downloader = BoundedDownloader::new(transport, HOST);
        let err = downloader
            .download_all(vec![bad], &SyncSession::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ChecksumMismatch { ref path, .. } if path == "a.js"));
    }

    #[tokio::test]
    async fn test_checksum_disabled_accepts_any_body() {
        let transport = Arc::new(MockTransport::new());
        serve(&transport, "a.js", b"tampered");

        let downloader = BoundedDownloader::new(transport, HOST).with_checksum(false);
        let outcome = downloader
            .download_all(vec![entry("a.js", b"original", false)], &SyncSession::new())
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].verified_hash, content_hash(b"original"));
        assert_ne!(outcome.results[0].verified_hash, content_hash(b"tampered"));
    }

    #[tokio::test]
    async fn test_optional_transport_failure_skipped() {
        let transport = Arc::new(MockTransport::new());
        serve(&transport, "a.js", b"alpha");
        transport.fail(&format!("{}/opt.js", HOST), TransportErrorKind::Timeout);

        let downloader = BoundedDownloader::new(transport, HOST);
        let session = SyncSession::new();
        let outcome = downloader
            .download_all(
                vec![entry("a.js", b"alpha", false), entry("opt.js", b"optional", true)],
                &session,
            )
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].entry.path, "opt.js");
        assert_eq!(session.loaded_bytes(), session.total_bytes());
    }

    #[tokio::test]
    async fn test_required_transport_failure_is_fatal() {
        let transport = Arc::new(MockTransport::new());

        let downloader = BoundedDownloader::new(transport, HOST);
        let err = downloader
            .download_all(vec![entry("missing.js", b"x", false)], &SyncSession::new())
            .await
            .unwrap_err();
        match err {
            SyncError::TransportFailure { path, source } => {
                assert_eq!(path, "missing.js");
                assert_eq!(source.status(), Some(404));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let transport = Arc::new(MockTransport::new());
        let mut entries = Vec::new();
        for i in 0..8 {
            let path = format!("f{}.js", i);
            let body = vec![b'x'; 100 * (i + 1)];
            serve(&transport, &path, &body);
            entries.push(entry(&path, &body, false));
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let session = SyncSession::with_progress(Arc::new(move |loaded, total| {
            seen_clone.lock().push((loaded, total));
        }));

        BoundedDownloader::new(transport, HOST)
            .with_max_concurrent(3)
            .download_all(entries, &session)
            .await
            .unwrap();

        let seen = seen.lock();
        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
        assert!(seen.iter().all(|(loaded, total)| loaded <= total));
        assert_eq!(seen.last().map(|s| s.0), Some(3600));
    }

    #[test]
    fn test_max_concurrent_floor() {
        let downloader =
            BoundedDownloader::new(Arc::new(MockTransport::new()), HOST).with_max_concurrent(0);
        assert_eq!(downloader.max_concurrent(), 1);
    }
}
