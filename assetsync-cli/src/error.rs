//! CLI error type.

use std::process::ExitCode;

use assetsync::logging::LoggingError;
use assetsync::{StorageError, SyncError, TransportError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("could not determine a store directory; pass --store")]
    NoStoreDir,

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("store error: {0}")]
    Storage(#[from] StorageError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Logging(#[from] LoggingError),
}

impl From<assetsync::config::ConfigError> for CliError {
    fn from(e: assetsync::config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_) | Self::NoStoreDir => ExitCode::from(2),
            Self::Sync(SyncError::VersionIncompatible { .. }) => ExitCode::from(3),
            _ => ExitCode::FAILURE,
        }
    }
}
