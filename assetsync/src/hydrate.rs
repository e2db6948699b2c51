//! Hydration: turn the activation list into an ordered resolution list.
//!
//! Every activation reference resolves to either cached bytes or a remote
//! URL. Bytes downloaded this session are used directly; up-to-date assets
//! are read lazily from the [`ContentStore`], concurrently. The output keeps
//! activation-list order, which the activation layer depends on for script
//! execution order.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::manifest::{ActivationRef, AssetType, Manifest};
use crate::store::ContentStore;
use crate::sync::{asset_url, DownloadResult};

const SOURCEMAP_MARKER: &str = "\n//# sourceMappingURL=";

/// Where an activation reference's content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    /// Content is available locally.
    Cached { bytes: Bytes, content_type: String },
    /// Content must be loaded from the network by the activation layer.
    RemoteOnly { url: String },
}

impl AssetSource {
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached { .. })
    }
}

/// Resolved activation reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub activation: ActivationRef,
    /// Effective type: the file entry's for cacheable paths.
    pub asset_type: AssetType,
    pub source: AssetSource,
}

/// Resolves activation references to content.
#[derive(Clone)]
pub struct Hydrator {
    store: ContentStore,
    host: String,
    rewrite_sourcemaps: bool,
}

impl Hydrator {
    pub fn new(store: ContentStore, host: impl Into<String>, rewrite_sourcemaps: bool) -> Self {
        Self {
            store,
            host: host.into(),
            rewrite_sourcemaps,
        }
    }

    /// Resolve every activation reference of `manifest`, in order.
    ///
    /// `downloaded` holds this session's fetched content by path; `skipped`
    /// names optional entries whose download failed. A skipped script
    /// resolves remote-only, a skipped stylesheet is left out.
    ///
    /// # Errors
    ///
    /// `StorageReadFailure` when a store read fails for any reason other than
    /// a missing value. A missing value degrades to remote-only.
    pub async fn hydrate(
        &self,
        manifest: &Manifest,
        downloaded: &HashMap<String, DownloadResult>,
        skipped: &HashSet<String>,
    ) -> SyncResult<Vec<Resolution>> {
        let resolutions = join_all(
            manifest
                .activation_list
                .iter()
                .map(|activation| self.resolve(manifest, activation, downloaded, skipped)),
        )
        .await;

        let mut ordered = Vec::with_capacity(resolutions.len());
        for resolution in resolutions {
            if let Some(resolution) = resolution? {
                ordered.push(resolution);
            }
        }

        debug!(
            resolved = ordered.len(),
            cached = ordered.iter().filter(|r| r.source.is_cached()).count(),
            "Hydration complete"
        );
        Ok(ordered)
    }

    async fn resolve(
        &self,
        manifest: &Manifest,
        activation: &ActivationRef,
        downloaded: &HashMap<String, DownloadResult>,
        skipped: &HashSet<String>,
    ) -> SyncResult<Option<Resolution>> {
        let asset_type = manifest.asset_type_of(activation);
        let resolved = |source| {
            Some(Resolution {
                activation: activation.clone(),
                asset_type,
                source,
            })
        };

        let Some(entry) = manifest.cacheable(activation) else {
            return Ok(resolved(AssetSource::RemoteOnly {
                url: self.remote_url(&activation.path),
            }));
        };

        if let Some(result) = downloaded.get(&entry.path) {
            return Ok(resolved(self.cached(
                &entry.path,
                asset_type,
                result.bytes.clone(),
                result.content_type.clone(),
            )));
        }

        if skipped.contains(&entry.path) {
            return Ok(match asset_type {
                AssetType::Script => resolved(AssetSource::RemoteOnly {
                    url: asset_url(&self.host, &entry.path, Some(&entry.hash)),
                }),
                AssetType::Stylesheet => None,
            });
        }

        match self.store.read(&entry.path).await {
            Ok(bytes) => Ok(resolved(self.cached(
                &entry.path,
                asset_type,
                Bytes::from(bytes),
                asset_type.default_content_type().to_string(),
            ))),
            Err(e) if e.is_not_found() => {
                warn!(path = %entry.path, "Cached asset missing from store, loading remotely");
                Ok(resolved(AssetSource::RemoteOnly {
                    url: asset_url(&self.host, &entry.path, Some(&entry.hash)),
                }))
            }
            Err(source) => Err(SyncError::StorageReadFailure {
                path: entry.path.clone(),
                source,
            }),
        }
    }

    fn cached(
        &self,
        path: &str,
        asset_type: AssetType,
        bytes: Bytes,
        content_type: String,
    ) -> AssetSource {
        let bytes = if self.rewrite_sourcemaps && asset_type == AssetType::Script {
            match std::str::from_utf8(&bytes) {
                Ok(text) => Bytes::from(rewrite_sourcemap(text, path)),
                Err(_) => bytes,
            }
        } else {
            bytes
        };
        AssetSource::Cached {
            bytes,
            content_type,
        }
    }

    fn remote_url(&self, path: &str) -> String {
        if path.contains("://") || path.starts_with("//") {
            path.to_string()
        } else {
            asset_url(&self.host, path, None)
        }
    }
}

/// Replace a script's trailing sourcemap comment with one naming `path`'s map.
///
/// Everything from the last `//# sourceMappingURL=` line on is dropped; the
/// new comment points at `path` with its first `.js` replaced by `.map`.
pub fn rewrite_sourcemap(text: &str, path: &str) -> String {
    let cut = text.rfind(SOURCEMAP_MARKER).unwrap_or(text.len());
    format!(
        "{}{}{}",
        &text[..cut],
        SOURCEMAP_MARKER,
        path.replacen(".js", ".map", 1)
    )
}
