//! Subcommand implementations.

pub mod clear;
pub mod status;
pub mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use assetsync::config::default_store_dir;
use assetsync::{DiskStorage, Storage};

use crate::error::CliError;

/// Store directory from the flag, else the platform default.
pub fn resolve_store_dir(store: Option<PathBuf>) -> Result<PathBuf, CliError> {
    store.or_else(default_store_dir).ok_or(CliError::NoStoreDir)
}

/// Open the disk-backed medium under `dir`.
pub async fn open_storage(dir: PathBuf) -> Result<Arc<dyn Storage>, CliError> {
    let storage = DiskStorage::open(dir).await?;
    Ok(Arc::new(storage))
}

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
