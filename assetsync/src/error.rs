//! Error types for a synchronization session.

use std::fmt;

use crate::store::StorageError;
use crate::sync::TransportError;

/// Result type for session operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Which declared version failed the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionComponent {
    /// The manifest's `appVersion`.
    Application,
    /// The manifest's `manifestVersion`.
    Manifest,
}

impl fmt::Display for VersionComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Application => write!(f, "application"),
            Self::Manifest => write!(f, "manifest"),
        }
    }
}

/// Errors that can occur during a synchronization session.
#[derive(Debug)]
pub enum SyncError {
    /// The manifest declares a version outside the supported range.
    VersionIncompatible {
        component: VersionComponent,
        required: String,
        found: String,
    },

    /// A network fetch failed.
    TransportFailure {
        path: String,
        source: TransportError,
    },

    /// Downloaded bytes don't hash to the declared value.
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// Persisting verified content failed. The entry stays memory-only.
    StorageWriteFailure { path: String, source: StorageError },

    /// Reading the content store failed.
    StorageReadFailure { path: String, source: StorageError },

    /// The manifest could not be parsed.
    ManifestParseFailure { path: String, reason: String },
}

impl SyncError {
    /// Whether this error must abort the session.
    ///
    /// Storage write failures degrade a single entry to memory-only, and a
    /// read that finds nothing means "no local copy". Everything else is fatal.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::StorageWriteFailure { .. } => false,
            Self::StorageReadFailure { source, .. } => !source.is_not_found(),
            _ => true,
        }
    }

    /// The asset path the error concerns, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::TransportFailure { path, .. }
            | Self::ChecksumMismatch { path, .. }
            | Self::StorageWriteFailure { path, .. }
            | Self::StorageReadFailure { path, .. }
            | Self::ManifestParseFailure { path, .. } => Some(path),
            Self::VersionIncompatible { .. } => None,
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VersionIncompatible {
                component: VersionComponent::Application,
                required,
                found,
            } => {
                write!(
                    f,
                    "unsupported application version: expected '{}' and got '{}'",
                    required, found
                )
            }
            Self::VersionIncompatible {
                component: VersionComponent::Manifest,
                required,
                found,
            } => {
                write!(
                    f,
                    "manifest version {} is not supported (expected '{}'); \
                     please update the application",
                    found, required
                )
            }
            Self::TransportFailure { path, source } => {
                write!(f, "failed to fetch {}: {}", path, source)
            }
            Self::ChecksumMismatch {
                path,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "checksum mismatch for {}: expected {}, computed {}",
                    path, expected, actual
                )
            }
            Self::StorageWriteFailure { path, source } => {
                write!(f, "failed to cache {}: {}", path, source)
            }
            Self::StorageReadFailure { path, source } => {
                write!(f, "failed to read cached {}: {}", path, source)
            }
            Self::ManifestParseFailure { path, reason } => {
                write!(f, "failed to parse manifest {}: {}", path, reason)
            }
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TransportFailure { source, .. } => Some(source),
            Self::StorageWriteFailure { source, .. } => Some(source),
            Self::StorageReadFailure { source, .. } => Some(source),
            _ => None,
        }
    }
}
