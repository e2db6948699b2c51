//! Manifest resolution: fetch, dedupe against the cached copy, validate.

use std::sync::Arc;

use semver::VersionReq;
use tracing::{debug, info, warn};

use super::types::Manifest;
use crate::error::{SyncError, SyncResult, VersionComponent};
use crate::store::{ContentStore, HashIndex};
use crate::sync::{asset_url, content_hash, CacheWriter, CommitOutcome, SyncSession, Transport};

/// A manifest obtained for this session.
#[derive(Debug)]
pub struct FetchedManifest {
    /// Parsed manifest.
    pub manifest: Manifest,
    /// Content hash of the fetched bytes.
    pub hash: String,
    /// Whether the fetched bytes matched the cached copy, which was parsed
    /// instead of the fresh download.
    pub unchanged: bool,
    /// Outcome of caching the new bytes, when they were written.
    pub commit: Option<CommitOutcome>,
}

/// Fetches and validates the manifest.
pub struct ManifestResolver {
    transport: Arc<dyn Transport>,
    store: ContentStore,
    index: Arc<HashIndex>,
    writer: CacheWriter,
    perform_checksum: bool,
}

impl ManifestResolver {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: ContentStore,
        index: Arc<HashIndex>,
        writer: CacheWriter,
        perform_checksum: bool,
    ) -> Self {
        Self {
            transport,
            store,
            index,
            writer,
            perform_checksum,
        }
    }

    /// Fetch the manifest at `path` under `host`.
    ///
    /// The cached copy is read first. If checksums are enabled and the
    /// fetched bytes hash to the value recorded for the cached copy, the
    /// cached copy is parsed and nothing is written. Otherwise the fresh
    /// bytes are cached and parsed.
    ///
    /// # Errors
    ///
    /// - `StorageReadFailure` when the cached copy exists but can't be read
    /// - `TransportFailure` when the fetch fails
    /// - `ManifestParseFailure` when the chosen bytes aren't a valid manifest
    pub async fn fetch(
        &self,
        host: &str,
        path: &str,
        session: &SyncSession,
    ) -> SyncResult<FetchedManifest> {
        let cached = match self.store.read(path).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.is_not_found() => None,
            Err(source) => {
                return Err(SyncError::StorageReadFailure {
                    path: path.to_string(),
                    source,
                })
            }
        };
        let cached_hash = match cached {
            Some(_) => self.index.get(path).await,
            None => None,
        };

        let url = asset_url(host, path, None);
        debug!(url = %url, cached = cached.is_some(), "Fetching manifest");

        let response = self
            .transport
            .fetch(&url, &|_: u64, _: Option<u64>| {})
            .await
            .map_err(|source| SyncError::TransportFailure {
                path: path.to_string(),
                source,
            })?;
        let hash = content_hash(&response.bytes);

        if let Some(cached) = cached {
            if self.perform_checksum && cached_hash.as_deref() == Some(hash.as_str()) {
                info!(path = %path, hash = %hash, "Manifest unchanged");
                return Ok(FetchedManifest {
                    manifest: Manifest::from_slice(path, &cached)?,
                    hash,
                    unchanged: true,
                    commit: None,
                });
            }
        }

        let manifest = Manifest::from_slice(path, &response.bytes)?;
        let commit = self
            .writer
            .commit(path, &response.bytes, &hash, session)
            .await;

        info!(
            path = %path,
            hash = %hash,
            app_version = %manifest.app_version,
            files = manifest.files.len(),
            "Fetched manifest"
        );

        Ok(FetchedManifest {
            manifest,
            hash,
            unchanged: false,
            commit: Some(commit),
        })
    }
}

/// Check the manifest's versions against the supported ranges.
///
/// # Errors
///
/// `SyncError::VersionIncompatible` naming the first failing component,
/// application version first.
pub fn validate_versions(
    manifest: &Manifest,
    supported_app: &VersionReq,
    supported_manifest: &VersionReq,
) -> SyncResult<()> {
    if !supported_app.matches(&manifest.app_version) {
        warn!(
            required = %supported_app,
            found = %manifest.app_version,
            "Unsupported application version"
        );
        return Err(SyncError::VersionIncompatible {
            component: VersionComponent::Application,
            required: supported_app.to_string(),
            found: manifest.app_version.to_string(),
        });
    }
    if !supported_manifest.matches(&manifest.manifest_version) {
        warn!(
            required = %supported_manifest,
            found = %manifest.manifest_version,
            "Unsupported manifest version"
        );
        return Err(SyncError::VersionIncompatible {
            component: VersionComponent::Manifest,
            required: supported_manifest.to_string(),
            found: manifest.manifest_version.to_string(),
        });
    }
    Ok(())
}
