//! Session state for one synchronization run.
//!
//! A [`SyncSession`] tracks the stage machine, byte progress, the set of
//! transfers in flight and the paths already committed to the hash index.
//! It is created fresh for every run and shared by reference with the
//! components working on that run.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Progress callback: `(loaded bytes, total bytes)`.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Stage of a synchronization session.
///
/// Stages advance strictly in declaration order. Any non-terminal stage may
/// move to `Failed`; `Ready` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncStage {
    Idle,
    ResolvingHost,
    FetchingManifest,
    ValidatingVersion,
    Diffing,
    Downloading,
    Hydrating,
    Ready,
    Failed,
}

impl SyncStage {
    /// Whether the session has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }

    /// The stage that follows on success, if any.
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::ResolvingHost),
            Self::ResolvingHost => Some(Self::FetchingManifest),
            Self::FetchingManifest => Some(Self::ValidatingVersion),
            Self::ValidatingVersion => Some(Self::Diffing),
            Self::Diffing => Some(Self::Downloading),
            Self::Downloading => Some(Self::Hydrating),
            Self::Hydrating => Some(Self::Ready),
            Self::Ready | Self::Failed => None,
        }
    }

    /// Whether moving from `self` to `to` is allowed.
    pub fn can_transition_to(&self, to: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Self::Failed || self.next() == Some(to)
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::ResolvingHost => "resolving host",
            Self::FetchingManifest => "fetching manifest",
            Self::ValidatingVersion => "validating version",
            Self::Diffing => "diffing",
            Self::Downloading => "downloading",
            Self::Hydrating => "hydrating",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Ephemeral state of one synchronization run.
pub struct SyncSession {
    stage: Mutex<SyncStage>,
    total_bytes: AtomicU64,
    /// Guarded so progress events are emitted in update order.
    loaded_bytes: Mutex<u64>,
    in_flight: Mutex<HashSet<String>>,
    peak_in_flight: AtomicUsize,
    committed: Mutex<HashSet<String>>,
    on_progress: Option<ProgressCallback>,
}

impl fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSession")
            .field("stage", &self.stage())
            .field("total_bytes", &self.total_bytes())
            .field("loaded_bytes", &self.loaded_bytes())
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

impl Default for SyncSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncSession {
    /// Create an idle session without a progress listener.
    pub fn new() -> Self {
        Self {
            stage: Mutex::new(SyncStage::Idle),
            total_bytes: AtomicU64::new(0),
            loaded_bytes: Mutex::new(0),
            in_flight: Mutex::new(HashSet::new()),
            peak_in_flight: AtomicUsize::new(0),
            committed: Mutex::new(HashSet::new()),
            on_progress: None,
        }
    }

    /// Create an idle session reporting progress to `callback`.
    pub fn with_progress(callback: ProgressCallback) -> Self {
        Self {
            on_progress: Some(callback),
            ..Self::new()
        }
    }

    /// Current stage.
    pub fn stage(&self) -> SyncStage {
        *self.stage.lock()
    }

    /// Move to `to`. Returns `false` and leaves the stage unchanged if the
    /// transition is not allowed.
    pub fn transition(&self, to: SyncStage) -> bool {
        let mut stage = self.stage.lock();
        if !stage.can_transition_to(to) {
            tracing::warn!(from = %*stage, to = %to, "Rejected session stage transition");
            return false;
        }
        *stage = to;
        true
    }

    /// Fix the byte total for the download stage and reset loaded bytes.
    pub fn start_downloads(&self, total_bytes: u64) {
        self.total_bytes.store(total_bytes, Ordering::SeqCst);
        *self.loaded_bytes.lock() = 0;
    }

    /// Total bytes expected this session.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::SeqCst)
    }

    /// Bytes credited so far.
    pub fn loaded_bytes(&self) -> u64 {
        *self.loaded_bytes.lock()
    }

    /// Credit `bytes` and notify the progress listener.
    pub fn add_loaded(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        let mut loaded = self.loaded_bytes.lock();
        *loaded += bytes;
        if let Some(ref cb) = self.on_progress {
            cb(*loaded, self.total_bytes());
        }
    }

    /// Register a transfer as in flight until the returned guard drops.
    pub fn begin_transfer(&self, path: &str) -> InFlightGuard<'_> {
        let count = {
            let mut in_flight = self.in_flight.lock();
            in_flight.insert(path.to_string());
            in_flight.len()
        };
        self.peak_in_flight.fetch_max(count, Ordering::SeqCst);
        InFlightGuard {
            session: self,
            path: path.to_string(),
        }
    }

    /// Transfers currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Highest number of simultaneous transfers seen.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Claim the single hash-index commit allowed for `path` this session.
    ///
    /// Returns `false` if the path was already claimed.
    pub fn claim_commit(&self, path: &str) -> bool {
        self.committed.lock().insert(path.to_string())
    }
}

/// Removes its path from the in-flight set on drop.
pub struct InFlightGuard<'a> {
    session: &'a SyncSession,
    path: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.session.in_flight.lock().remove(&self.path);
    }
}
