//! Manifest model and resolution.

mod resolver;
mod types;

pub use resolver::{validate_versions, FetchedManifest, ManifestResolver};
pub use types::{ActivationRef, AssetType, Manifest, ManifestEntry};
