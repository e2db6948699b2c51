//! Configuration for the asset loader.
//!
//! Settings are layered: built-in defaults, then the `[loader]` section of an
//! INI file, then runtime `key=value` overrides. Keys are accepted in
//! snake_case and in the camelCase spelling used by existing application
//! configs (`performMD5`, `useLocalCache`, ...).
//!
//! ```ini
//! [loader]
//! manifest_file = manifest.json
//! app_host = https://cdn.example.com/app
//! supported_app_version = ^1.2
//! supported_manifest_version = >=2, <3
//! perform_checksum = true
//! use_local_cache = true
//! rewrite_sourcemaps = false
//! max_concurrent_downloads = 5
//! ```

use std::path::{Path, PathBuf};

use ini::Ini;
use semver::VersionReq;
use thiserror::Error;
use tracing::warn;

/// INI section holding loader settings.
pub const CONFIG_SECTION: &str = "loader";

/// Default number of simultaneous downloads.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 5;

/// Default manifest path relative to the host.
pub const DEFAULT_MANIFEST_FILE: &str = "manifest.json";

/// Errors raised while building a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value could not be parsed for its key.
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    /// An override was not of the form `key=value`.
    #[error("malformed override '{0}', expected key=value")]
    MalformedOverride(String),

    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The config file is not valid INI.
    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Configuration for a [`Loader`](crate::Loader).
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Manifest path, relative to the host.
    pub manifest_file: String,

    /// Host prefix for every request. `None` means relative URLs.
    pub app_host: Option<String>,

    /// Range the manifest's `appVersion` must satisfy.
    pub supported_app_version: VersionReq,

    /// Range the manifest's `manifestVersion` must satisfy.
    pub supported_manifest_version: VersionReq,

    /// Verify content hashes of downloaded bytes.
    pub perform_checksum: bool,

    /// Persist downloads and skip assets whose hash is already cached.
    pub use_local_cache: bool,

    /// Point cached scripts' sourcemap comments at `{path}.map`.
    pub rewrite_sourcemaps: bool,

    /// Maximum simultaneous transfers (at least 1).
    pub max_concurrent_downloads: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            manifest_file: DEFAULT_MANIFEST_FILE.to_string(),
            app_host: None,
            supported_app_version: VersionReq::STAR,
            supported_manifest_version: VersionReq::STAR,
            perform_checksum: true,
            use_local_cache: true,
            rewrite_sourcemaps: false,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
        }
    }
}

impl LoaderConfig {
    /// Create a configuration for the given host with defaults elsewhere.
    pub fn new(app_host: impl Into<String>) -> Self {
        Self {
            app_host: Some(app_host.into()),
            ..Default::default()
        }
    }

    /// Set the manifest path.
    pub fn with_manifest_file(mut self, path: impl Into<String>) -> Self {
        self.manifest_file = path.into();
        self
    }

    /// Set the host prefix.
    pub fn with_app_host(mut self, host: impl Into<String>) -> Self {
        self.app_host = Some(host.into());
        self
    }

    /// Set the supported application version range.
    pub fn with_supported_app_version(mut self, req: VersionReq) -> Self {
        self.supported_app_version = req;
        self
    }

    /// Set the supported manifest version range.
    pub fn with_supported_manifest_version(mut self, req: VersionReq) -> Self {
        self.supported_manifest_version = req;
        self
    }

    /// Enable or disable checksum verification.
    pub fn with_perform_checksum(mut self, enabled: bool) -> Self {
        self.perform_checksum = enabled;
        self
    }

    /// Enable or disable the local cache.
    pub fn with_use_local_cache(mut self, enabled: bool) -> Self {
        self.use_local_cache = enabled;
        self
    }

    /// Enable or disable sourcemap rewriting.
    pub fn with_rewrite_sourcemaps(mut self, enabled: bool) -> Self {
        self.rewrite_sourcemaps = enabled;
        self
    }

    /// Set the maximum concurrent downloads (minimum 1).
    pub fn with_max_concurrent_downloads(mut self, max: usize) -> Self {
        self.max_concurrent_downloads = max.max(1);
        self
    }

    /// Host prefix, empty when unset.
    pub fn host(&self) -> &str {
        self.app_host.as_deref().unwrap_or("")
    }

    /// Load defaults overlaid with the `[loader]` section of an INI file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut config = Self::default();
        config.apply_ini_str(&text)?;
        Ok(config)
    }

    /// Overlay the `[loader]` section of INI text onto this configuration.
    pub fn apply_ini_str(&mut self, text: &str) -> Result<(), ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if let Some(section) = ini.section(Some(CONFIG_SECTION)) {
            self.apply_overrides(section.iter())?;
        }
        Ok(())
    }

    /// Apply a sequence of `(key, value)` overrides.
    ///
    /// Unknown keys are logged and skipped.
    pub fn apply_overrides<'a, I>(&mut self, overrides: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (key, value) in overrides {
            if !self.set(key, value)? {
                warn!(key = %key, "Ignoring unknown loader option");
            }
        }
        Ok(())
    }

    /// Set one option by name. Returns `false` if the key is not recognized.
    pub fn set(&mut self, key: &str, value: &str) -> Result<bool, ConfigError> {
        let value = value.trim();
        match key.trim() {
            "manifest_file" | "manifestFile" => self.manifest_file = value.to_string(),
            "app_host" | "appHost" => {
                let host = value.trim_end_matches('/');
                self.app_host = (!host.is_empty()).then(|| host.to_string());
            }
            "supported_app_version" | "supportedAppVersion" => {
                self.supported_app_version = parse_req(key, value)?;
            }
            "supported_manifest_version" | "supportedManifestVersion" => {
                self.supported_manifest_version = parse_req(key, value)?;
            }
            "perform_checksum" | "performMD5" | "perform_md5" => {
                self.perform_checksum = parse_bool(key, value)?;
            }
            "use_local_cache" | "useLocalCache" => {
                self.use_local_cache = parse_bool(key, value)?;
            }
            "rewrite_sourcemaps" | "rewriteSourcemaps" => {
                self.rewrite_sourcemaps = parse_bool(key, value)?;
            }
            "max_concurrent_downloads" | "maxConcurrentDownloads" => {
                let max = value
                    .parse::<usize>()
                    .map_err(|e| invalid(key, value, e.to_string()))?;
                self.max_concurrent_downloads = max.max(1);
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Split a `key=value` override.
pub fn parse_override(raw: &str) -> Result<(&str, &str), ConfigError> {
    raw.split_once('=')
        .filter(|(k, _)| !k.trim().is_empty())
        .ok_or_else(|| ConfigError::MalformedOverride(raw.to_string()))
}

/// Default directory for the disk-backed store.
pub fn default_store_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("assetsync"))
}

fn parse_req(key: &str, value: &str) -> Result<VersionReq, ConfigError> {
    VersionReq::parse(value).map_err(|e| invalid(key, value, e.to_string()))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected a boolean".to_string())),
    }
}

fn invalid(key: &str, value: &str, reason: String) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason,
    }
}
