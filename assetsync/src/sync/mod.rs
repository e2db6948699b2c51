//! Synchronization engine: diffing, downloading and caching.
//!
//! ```text
//! diff ──► BoundedDownloader ──► CacheWriter ──► ContentStore + HashIndex
//!                 │
//!                 └── Transport (HttpTransport in production)
//! ```
//!
//! A [`SyncSession`] carries the per-run state shared by these components.

mod checksum;
mod diff;
mod downloader;
mod progress;
mod state;
mod transport;
mod writer;

pub use checksum::{content_hash, verify_checksum};
pub use diff::diff;
pub use downloader::{BoundedDownloader, DownloadOutcome, DownloadResult, SkippedEntry};
pub use progress::TransferProgress;
pub use state::{InFlightGuard, ProgressCallback, SyncSession, SyncStage};
pub use transport::{
    asset_url, FetchResponse, HttpTransport, ProgressFn, Transport, TransportError,
    TransportErrorKind, DEFAULT_TIMEOUT_SECS,
};
pub use writer::{CacheWriter, CommitOutcome};

#[cfg(test)]
pub(crate) use transport::mock;
