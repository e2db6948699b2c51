//! assetsync - offline-capable asset updates
//!
//! Keeps a local content store in sync with a remote manifest of versioned
//! assets. Each [`Loader::load`] session fetches the manifest, checks that
//! its versions are supported, downloads only the assets whose hash changed
//! (with bounded concurrency and optional integrity checks), caches them, and
//! returns an ordered list telling the activation layer where every asset's
//! content comes from.
//!
//! # Modules
//!
//! - [`store`]: storage media, the content store and the hash index
//! - [`manifest`]: manifest model and resolution
//! - [`sync`]: diffing, transport, downloading and caching
//! - [`hydrate`]: activation-order resolution
//! - [`loader`]: the session orchestrator

pub mod config;
pub mod error;
pub mod host;
pub mod hydrate;
pub mod loader;
pub mod logging;
pub mod manifest;
pub mod store;
pub mod sync;

pub use config::LoaderConfig;
pub use error::{SyncError, SyncResult};
pub use host::{HostResolver, StaticHost};
pub use hydrate::{AssetSource, Resolution};
pub use loader::{LoadOutcome, Loader, LoaderEvent, SyncReport};
pub use manifest::{ActivationRef, AssetType, Manifest, ManifestEntry};
pub use store::{ContentStore, DiskStorage, HashIndex, MemoryStorage, Storage, StorageError};
pub use sync::{HttpTransport, SyncStage, Transport, TransportError, TransportErrorKind};
