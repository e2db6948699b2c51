//! Stale-file diffing.
//!
//! Compares the manifest's declared hashes against the hash index to find
//! the assets that must be downloaded.

use std::collections::{BTreeMap, HashSet};

use crate::manifest::{Manifest, ManifestEntry};

/// Compute the diff set for a manifest.
///
/// An entry is included when it is referenced by the activation list, is
/// listed in `files`, and either the local cache is disabled or the index has
/// no hash (or a different hash) for its path. Paths only in the activation
/// list are remote-only and never part of the diff.
///
/// An entry is optional if either the file entry or its first activation
/// reference says so.
///
/// Each path appears at most once, in first-activation order. Callers must
/// not rely on the order.
pub fn diff(
    manifest: &Manifest,
    index: &BTreeMap<String, String>,
    use_local_cache: bool,
) -> Vec<ManifestEntry> {
    let mut seen = HashSet::new();

    manifest
        .activation_list
        .iter()
        .filter_map(|activation| {
            manifest.cacheable(activation).map(|entry| {
                let mut entry = entry.clone();
                entry.optional |= activation.optional;
                entry
            })
        })
        .filter(|entry| seen.insert(entry.path.clone()))
        .filter(|entry| !use_local_cache || index.get(&entry.path) != Some(&entry.hash))
        .collect()
}
