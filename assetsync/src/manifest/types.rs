//! Manifest data model.
//!
//! The wire format is JSON:
//!
//! ```json
//! {
//!   "appVersion": "1.4.0",
//!   "manifestVersion": "2.0.0",
//!   "files": {
//!     "js/app.js": { "path": "js/app.js", "hash": "…", "size": 10240, "type": "js" }
//!   },
//!   "domNodes": [
//!     { "path": "js/app.js", "type": "js", "attributes": { "defer": "" } },
//!     { "path": "https://cdn.example.com/analytics.js", "type": "js", "optional": true }
//!   ]
//! }
//! ```
//!
//! `activationList` is accepted as an alias of `domNodes`, and asset types may
//! be spelled `script`/`stylesheet`. A `domNodes` entry may omit its type when
//! the path is listed in `files`; the file entry's type is used.

use std::collections::{BTreeMap, HashMap};

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Kind of asset, which decides how the activation layer materializes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetType {
    /// Executable script, activated strictly in list order.
    #[serde(rename = "js", alias = "script")]
    Script,
    /// Stylesheet.
    #[serde(rename = "css", alias = "stylesheet")]
    Stylesheet,
}

impl AssetType {
    /// MIME type used when the transport reports none.
    pub fn default_content_type(&self) -> &'static str {
        match self {
            Self::Script => "text/javascript",
            Self::Stylesheet => "text/css",
        }
    }
}

/// A cacheable file declared by the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Asset path relative to the host. Filled from the `files` key if absent.
    #[serde(default)]
    pub path: String,
    /// Declared content hash (lowercase hex).
    pub hash: String,
    /// Declared uncompressed size in bytes.
    pub size: u64,
    /// Asset kind.
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    /// Whether a failed fetch may be skipped.
    #[serde(default)]
    pub optional: bool,
}

/// One element of the ordered activation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationRef {
    /// Asset path (or absolute URL for remote-only assets).
    pub path: String,
    /// Asset kind.
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    /// Attributes to set on the materialized node.
    pub attributes: BTreeMap<String, String>,
    /// Whether activation failure may be ignored.
    pub optional: bool,
}

/// A parsed, validated manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Application version this manifest describes.
    pub app_version: Version,
    /// Manifest format version.
    pub manifest_version: Version,
    /// Cacheable files keyed by path.
    pub files: HashMap<String, ManifestEntry>,
    /// Activation order.
    pub activation_list: Vec<ActivationRef>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    app_version: String,
    manifest_version: String,
    #[serde(default)]
    files: HashMap<String, ManifestEntry>,
    #[serde(default, rename = "domNodes", alias = "activationList")]
    activation_list: Vec<RawActivationRef>,
}

#[derive(Deserialize)]
struct RawActivationRef {
    path: String,
    #[serde(default, rename = "type")]
    asset_type: Option<AssetType>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    optional: bool,
}

impl Manifest {
    /// Parse manifest JSON fetched from or cached at `path`.
    ///
    /// # Errors
    ///
    /// `SyncError::ManifestParseFailure` for malformed JSON, versions that
    /// aren't semantic versions, or an activation entry whose type can't be
    /// determined.
    pub fn from_slice(path: &str, bytes: &[u8]) -> SyncResult<Self> {
        let fail = |reason: String| SyncError::ManifestParseFailure {
            path: path.to_string(),
            reason,
        };

        let raw: RawManifest = serde_json::from_slice(bytes).map_err(|e| fail(e.to_string()))?;

        let app_version = Version::parse(&raw.app_version)
            .map_err(|e| fail(format!("appVersion '{}': {}", raw.app_version, e)))?;
        let manifest_version = Version::parse(&raw.manifest_version)
            .map_err(|e| fail(format!("manifestVersion '{}': {}", raw.manifest_version, e)))?;

        let mut files = raw.files;
        for (key, entry) in files.iter_mut() {
            if entry.path.is_empty() {
                entry.path = key.clone();
            } else if entry.path != *key {
                return Err(fail(format!(
                    "file entry '{}' declares path '{}'",
                    key, entry.path
                )));
            }
        }

        let activation_list = raw
            .activation_list
            .into_iter()
            .map(|node| {
                let asset_type = node
                    .asset_type
                    .or_else(|| files.get(&node.path).map(|f| f.asset_type))
                    .ok_or_else(|| fail(format!("unknown node type for '{}'", node.path)))?;
                Ok(ActivationRef {
                    path: node.path,
                    asset_type,
                    attributes: node.attributes,
                    optional: node.optional,
                })
            })
            .collect::<SyncResult<Vec<_>>>()?;

        Ok(Self {
            app_version,
            manifest_version,
            files,
            activation_list,
        })
    }

    /// The file entry for an activation reference, if it is cacheable.
    ///
    /// Paths referenced by the activation list but absent from `files` are
    /// delivered remotely and never cached.
    pub fn cacheable(&self, activation: &ActivationRef) -> Option<&ManifestEntry> {
        self.files.get(&activation.path)
    }

    /// Effective type of an activation reference: the file entry's type for
    /// cacheable paths, the reference's own type otherwise.
    pub fn asset_type_of(&self, activation: &ActivationRef) -> AssetType {
        self.cacheable(activation)
            .map(|f| f.asset_type)
            .unwrap_or(activation.asset_type)
    }
}
