//! `clear` command: empty the store and the hash index.

use std::path::PathBuf;
use std::sync::Arc;

use assetsync::{ContentStore, HashIndex};

use super::{open_storage, resolve_store_dir};
use crate::error::CliError;

pub async fn run(store: Option<PathBuf>) -> Result<(), CliError> {
    let dir = resolve_store_dir(store)?;
    println!("Clearing asset store at: {}", dir.display());

    let storage = open_storage(dir).await?;
    let index = HashIndex::load(Arc::clone(&storage)).await?;
    let recorded = index.len().await;

    index.clear().await?;
    let removed = ContentStore::new(storage).clear().await?;

    println!("Removed {} asset(s) and {} recorded hash(es)", removed, recorded);
    Ok(())
}
