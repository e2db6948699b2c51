//! Session orchestrator.
//!
//! [`Loader`] owns the injected store, hash index and transport, and drives
//! one synchronization session at a time through its stages:
//!
//! ```text
//! Idle → ResolvingHost → FetchingManifest → ValidatingVersion → Diffing
//!      → Downloading → Hydrating → Ready
//! ```
//!
//! Any fatal error moves the session to `Failed`. Observers follow along
//! through [`Loader::subscribe`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use assetsync::{HttpTransport, Loader, LoaderConfig, MemoryStorage};
//!
//! let config = LoaderConfig::new("https://cdn.example.com/app");
//! let loader = Loader::open(
//!     config,
//!     Arc::new(MemoryStorage::new()),
//!     Arc::new(HttpTransport::new()?),
//! )
//! .await?;
//!
//! let outcome = loader.load().await?;
//! for resolution in &outcome.resolutions {
//!     println!("{}", resolution.activation.path);
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::LoaderConfig;
use crate::error::{SyncError, SyncResult};
use crate::host::{HostResolver, StaticHost};
use crate::hydrate::{Hydrator, Resolution};
use crate::manifest::{validate_versions, Manifest, ManifestResolver};
use crate::store::{ContentStore, HashIndex, Storage, StorageError, INDEX_KEY};
use crate::sync::{
    diff, BoundedDownloader, CacheWriter, CommitOutcome, DownloadResult, SyncSession, SyncStage,
    Transport,
};

/// Capacity of the event channel. Slow subscribers lag rather than block.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Notifications emitted while a session runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderEvent {
    /// The session entered a stage.
    Stage(SyncStage),
    /// Download progress in bytes.
    Progress { loaded: u64, total: u64 },
    /// The session finished successfully.
    Ready,
    /// The session failed.
    Error(String),
}

/// Summary of one session.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Host the session fetched from.
    pub host: String,
    /// Content hash of the manifest.
    pub manifest_hash: String,
    /// Whether the manifest matched the cached copy.
    pub manifest_unchanged: bool,
    /// Paths downloaded this session.
    pub downloaded: Vec<String>,
    /// Downloaded paths that couldn't be cached and live in memory only.
    pub memory_only: Vec<String>,
    /// Optional paths dropped after a failed download.
    pub skipped: Vec<String>,
    /// Sum of declared sizes of the diff set.
    pub total_bytes: u64,
    /// Bytes credited by the end of the session.
    pub loaded_bytes: u64,
    /// Highest number of simultaneous transfers.
    pub peak_in_flight: usize,
}

/// Result of a successful session.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub manifest: Manifest,
    /// Resolutions in activation-list order.
    pub resolutions: Vec<Resolution>,
    pub report: SyncReport,
}

/// Asset loader: keeps the local store in sync with a remote manifest.
pub struct Loader {
    config: LoaderConfig,
    store: ContentStore,
    index: Arc<HashIndex>,
    transport: Arc<dyn Transport>,
    host_resolver: Arc<dyn HostResolver>,
    events: broadcast::Sender<LoaderEvent>,
    /// Held for the length of a session.
    session_lock: Mutex<()>,
}

impl Loader {
    /// Build a loader over `storage`, loading the hash index.
    ///
    /// # Errors
    ///
    /// `StorageReadFailure` if the medium can't be read.
    pub async fn open(
        config: LoaderConfig,
        storage: Arc<dyn Storage>,
        transport: Arc<dyn Transport>,
    ) -> SyncResult<Self> {
        let index = HashIndex::load(Arc::clone(&storage))
            .await
            .map_err(|source| SyncError::StorageReadFailure {
                path: INDEX_KEY.to_string(),
                source,
            })?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!(
            host = %config.host(),
            manifest = %config.manifest_file,
            use_local_cache = config.use_local_cache,
            perform_checksum = config.perform_checksum,
            "Loader opened"
        );

        Ok(Self {
            host_resolver: Arc::new(StaticHost::new(config.app_host.clone())),
            config,
            store: ContentStore::new(storage),
            index: Arc::new(index),
            transport,
            events,
            session_lock: Mutex::new(()),
        })
    }

    /// Replace the host resolver.
    pub fn with_host_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.host_resolver = resolver;
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn index(&self) -> &HashIndex {
        &self.index
    }

    /// Receive events from subsequent sessions.
    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.events.subscribe()
    }

    /// Run one synchronization session.
    ///
    /// Sessions are serialized: a call made while another session runs waits
    /// for it to finish.
    ///
    /// # Errors
    ///
    /// The fatal error that moved the session to `Failed`. An `Error` event
    /// carrying its message is emitted first.
    pub async fn load(&self) -> SyncResult<LoadOutcome> {
        let _session_guard = self.session_lock.lock().await;

        let events = self.events.clone();
        let session = SyncSession::with_progress(Arc::new(move |loaded, total| {
            let _ = events.send(LoaderEvent::Progress { loaded, total });
        }));

        match self.run(&session).await {
            Ok(outcome) => {
                info!(
                    resolutions = outcome.resolutions.len(),
                    downloaded = outcome.report.downloaded.len(),
                    memory_only = outcome.report.memory_only.len(),
                    skipped = outcome.report.skipped.len(),
                    "Session ready"
                );
                self.emit(LoaderEvent::Ready);
                Ok(outcome)
            }
            Err(e) => {
                error!(stage = %session.stage(), error = %e, "Session failed");
                if session.transition(SyncStage::Failed) {
                    self.emit(LoaderEvent::Stage(SyncStage::Failed));
                }
                self.emit(LoaderEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Remove every cached asset and forget all recorded hashes.
    ///
    /// Waits for a running session to finish first.
    pub async fn clear_cache(&self) -> Result<usize, StorageError> {
        let _session_guard = self.session_lock.lock().await;
        self.index.clear().await?;
        let removed = self.store.clear().await?;
        info!(removed, "Cleared asset cache");
        Ok(removed)
    }

    async fn run(&self, session: &SyncSession) -> SyncResult<LoadOutcome> {
        let config = &self.config;
        let mut report = SyncReport::default();

        self.advance(session, SyncStage::ResolvingHost);
        let host = self.resolve_host().await;
        report.host = host.clone();

        self.advance(session, SyncStage::FetchingManifest);
        let writer = CacheWriter::new(
            self.store.clone(),
            Arc::clone(&self.index),
            config.use_local_cache,
        );
        let resolver = ManifestResolver::new(
            Arc::clone(&self.transport),
            self.store.clone(),
            Arc::clone(&self.index),
            writer.clone(),
            config.perform_checksum,
        );
        let fetched = resolver
            .fetch(&host, &config.manifest_file, session)
            .await?;
        report.manifest_hash = fetched.hash;
        report.manifest_unchanged = fetched.unchanged;
        if let Some(CommitOutcome::MemoryOnly(_)) = fetched.commit {
            report.memory_only.push(config.manifest_file.clone());
        }
        let manifest = fetched.manifest;

        self.advance(session, SyncStage::ValidatingVersion);
        validate_versions(
            &manifest,
            &config.supported_app_version,
            &config.supported_manifest_version,
        )?;

        self.advance(session, SyncStage::Diffing);
        let known = self.index.snapshot().await;
        let stale = diff(&manifest, &known, config.use_local_cache);
        info!(
            stale = stale.len(),
            files = manifest.files.len(),
            "Computed diff set"
        );

        self.advance(session, SyncStage::Downloading);
        let downloader = BoundedDownloader::new(Arc::clone(&self.transport), host.clone())
            .with_max_concurrent(config.max_concurrent_downloads)
            .with_checksum(config.perform_checksum);
        let outcome = downloader.download_all(stale, session).await?;

        for (path, commit) in writer.commit_all(&outcome.results, session).await {
            if let CommitOutcome::MemoryOnly(e) = commit {
                debug!(path = %path, error = %e, "Serving asset from memory");
                report.memory_only.push(path);
            }
        }
        report.skipped = outcome
            .skipped
            .iter()
            .map(|s| s.entry.path.clone())
            .collect();
        report.total_bytes = session.total_bytes();
        report.loaded_bytes = session.loaded_bytes();
        report.peak_in_flight = session.peak_in_flight();

        let downloaded: HashMap<String, DownloadResult> = outcome
            .results
            .into_iter()
            .map(|r| (r.entry.path.clone(), r))
            .collect();
        report.downloaded = downloaded.keys().cloned().collect();
        report.downloaded.sort();
        let skipped: HashSet<String> = report.skipped.iter().cloned().collect();

        self.advance(session, SyncStage::Hydrating);
        let hydrator = Hydrator::new(self.store.clone(), host, config.rewrite_sourcemaps);
        let resolutions = hydrator.hydrate(&manifest, &downloaded, &skipped).await?;

        self.advance(session, SyncStage::Ready);
        Ok(LoadOutcome {
            manifest,
            resolutions,
            report,
        })
    }

    async fn resolve_host(&self) -> String {
        match self.host_resolver.resolve().await {
            Ok(Some(host)) => host.trim_end_matches('/').to_string(),
            Ok(None) => self.config.host().to_string(),
            Err(e) => {
                warn!(error = %e, fallback = %self.config.host(), "Host resolution failed");
                self.config.host().to_string()
            }
        }
    }

    fn advance(&self, session: &SyncSession, stage: SyncStage) {
        if session.transition(stage) {
            debug!(stage = %stage, "Session stage");
            self.emit(LoaderEvent::Stage(stage));
        }
    }

    fn emit(&self, event: LoaderEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostResolveError;
    use crate::store::{BoxFuture, MemoryStorage};
    use crate::sync::content_hash;
    use crate::sync::mock::MockTransport;

    const HOST: &str = "https://assets.test";

    fn manifest_json(app_version: &str, files: &[(&str, &[u8])]) -> String {
        let entries: Vec<String> = files
            .iter()
            .map(|(p, body)| {
                format!(
                    r#""{}":{{"hash":"{}","size":{},"type":"js"}}"#,
                    p,
                    content_hash(body),
                    body.len()
                )
            })
            .collect();
        let nodes: Vec<String> = files
            .iter()
            .map(|(p, _)| format!(r#"{{"path":"{}","type":"js"}}"#, p))
            .collect();
        format!(
            r#"{{"appVersion":"{}","manifestVersion":"1.0.0","files":{{{}}},"domNodes":[{}]}}"#,
            app_version,
            entries.join(","),
            nodes.join(",")
        )
    }

    fn serve_app(transport: &MockTransport, app_version: &str, files: &[(&str, &[u8])]) {
        transport.serve(
            &format!("{}/manifest.json", HOST),
            manifest_json(app_version, files),
        );
        for (path, body) in files {
            transport.serve(&format!("{}/{}", HOST, path), body.to_vec());
        }
    }

    async fn loader(transport: Arc<MockTransport>, config: LoaderConfig) -> Loader {
        Loader::open(config, Arc::new(MemoryStorage::new()), transport)
            .await
            .unwrap()
    }

    fn drain(rx: &mut broadcast::Receiver<LoaderEvent>) -> Vec<LoaderEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_session_emits_stages_in_order() {
        let transport = Arc::new(MockTransport::new());
        serve_app(&transport, "1.0.0", &[("a.js", &b"alpha"[..])]);

        let loader = loader(transport, LoaderConfig::new(HOST)).await;
        let mut rx = loader.subscribe();
        let outcome = loader.load().await.unwrap();

        let stages: Vec<SyncStage> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                LoaderEvent::Stage(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(
            stages,
            vec![
                SyncStage::ResolvingHost,
                SyncStage::FetchingManifest,
                SyncStage::ValidatingVersion,
                SyncStage::Diffing,
                SyncStage::Downloading,
                SyncStage::Hydrating,
                SyncStage::Ready,
            ]
        );
        assert_eq!(outcome.report.downloaded, vec!["a.js".to_string()]);
        assert_eq!(outcome.report.host, HOST);
    }

    #[tokio::test]
    async fn test_version_failure_emits_error() {
        let transport = Arc::new(MockTransport::new());
        serve_app(&transport, "2.0.0", &[("a.js", &b"alpha"[..])]);

        let config = LoaderConfig::new(HOST)
            .with_supported_app_version(semver::VersionReq::parse("^1.0.0").unwrap());
        let loader = loader(Arc::clone(&transport), config).await;
        let mut rx = loader.subscribe();

        let err = loader.load().await.unwrap_err();
        assert!(matches!(err, SyncError::VersionIncompatible { .. }));

        let events = drain(&mut rx);
        assert!(events.contains(&LoaderEvent::Stage(SyncStage::Failed)));
        assert!(matches!(events.last(), Some(LoaderEvent::Error(_))));
        assert!(!events.contains(&LoaderEvent::Stage(SyncStage::Downloading)));
        assert_eq!(transport.requests().len(), 1);
    }

    struct FailingResolver;

    impl HostResolver for FailingResolver {
        fn resolve(&self) -> BoxFuture<'_, Result<Option<String>, HostResolveError>> {
            Box::pin(async { Err(HostResolveError("lookup refused".to_string())) })
        }
    }

    #[tokio::test]
    async fn test_host_resolver_failure_falls_back() {
        let transport = Arc::new(MockTransport::new());
        serve_app(&transport, "1.0.0", &[]);

        let loader = loader(transport, LoaderConfig::new(HOST))
            .await
            .with_host_resolver(Arc::new(FailingResolver));
        let outcome = loader.load().await.unwrap();
        assert_eq!(outcome.report.host, HOST);
    }

    #[tokio::test]
    async fn test_resolved_host_preferred() {
        let transport = Arc::new(MockTransport::new());
        transport.serve(
            "https://mirror.test/manifest.json",
            manifest_json("1.0.0", &[]),
        );

        let loader = loader(transport, LoaderConfig::new(HOST))
            .await
            .with_host_resolver(Arc::new(StaticHost::new(Some(
                "https://mirror.test/".to_string(),
            ))));
        let outcome = loader.load().await.unwrap();
        assert_eq!(outcome.report.host, "https://mirror.test");
    }

    #[tokio::test]
    async fn test_clear_cache_forces_redownload() {
        let transport = Arc::new(MockTransport::new());
        serve_app(&transport, "1.0.0", &[("a.js", &b"alpha"[..])]);

        let loader = loader(transport, LoaderConfig::new(HOST)).await;
        loader.load().await.unwrap();
        assert!(loader.load().await.unwrap().report.downloaded.is_empty());

        let removed = loader.clear_cache().await.unwrap();
        assert_eq!(removed, 2);
        assert!(loader.index().is_empty().await);

        let outcome = loader.load().await.unwrap();
        assert_eq!(outcome.report.downloaded, vec!["a.js".to_string()]);
    }
}
