//! `status` command: list cached assets.

use std::path::PathBuf;
use std::sync::Arc;

use assetsync::{ContentStore, HashIndex};

use super::{format_size, open_storage, resolve_store_dir};
use crate::error::CliError;

pub async fn run(store: Option<PathBuf>) -> Result<(), CliError> {
    let dir = resolve_store_dir(store)?;
    println!("Store: {}", dir.display());

    let storage = open_storage(dir).await?;
    let index = HashIndex::load(Arc::clone(&storage)).await?;
    let content = ContentStore::new(Arc::clone(&storage));

    let hashes = index.snapshot().await;
    let paths = content.paths().await?;

    println!("  Assets: {}", paths.len());
    println!("  Size:   {}", format_size(storage.size_bytes()));
    if let Some(quota) = storage.quota_bytes() {
        println!("  Quota:  {}", format_size(quota));
    }

    if hashes.is_empty() {
        println!("\nNo recorded hashes.");
        return Ok(());
    }

    println!();
    for (path, hash) in &hashes {
        let marker = if paths.contains(path) { " " } else { "!" };
        println!("{} {:<40} {}", marker, path, hash);
    }
    Ok(())
}
