//! Shared fixtures for session tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assetsync::store::{BoxFuture, INDEX_KEY};
use assetsync::sync::{content_hash, FetchResponse, ProgressFn};
use assetsync::{
    LoaderEvent, MemoryStorage, Storage, StorageError, Transport, TransportError,
    TransportErrorKind,
};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;

pub const HOST: &str = "https://assets.test";

#[derive(Clone)]
enum Reply {
    Body {
        bytes: Vec<u8>,
        /// Byte count reported on the wire, for simulating compression.
        wire_size: Option<u64>,
    },
    Fail(TransportErrorKind),
}

/// In-memory transport serving scripted replies, keyed by URL without query.
pub struct ScriptedTransport {
    replies: Mutex<HashMap<String, Reply>>,
    requests: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    latency: Duration,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::with_latency(Duration::from_millis(0))
    }

    /// Every fetch holds its slot for `latency` before answering.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            latency,
        }
    }

    pub fn serve(&self, path: &str, body: impl Into<Vec<u8>>) {
        self.replies.lock().insert(
            url(path),
            Reply::Body {
                bytes: body.into(),
                wire_size: None,
            },
        );
    }

    /// Serve `body` while reporting progress against `wire_size` bytes.
    pub fn serve_compressed(&self, path: &str, body: impl Into<Vec<u8>>, wire_size: u64) {
        self.replies.lock().insert(
            url(path),
            Reply::Body {
                bytes: body.into(),
                wire_size: Some(wire_size),
            },
        );
    }

    pub fn fail(&self, path: &str, kind: TransportErrorKind) {
        self.replies.lock().insert(url(path), Reply::Fail(kind));
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    /// Requests for anything but the manifest.
    pub fn file_requests(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|u| !u.ends_with("/manifest.json"))
            .collect()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn reset_requests(&self) {
        self.requests.lock().clear();
    }
}

impl Transport for ScriptedTransport {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        on_progress: ProgressFn<'a>,
    ) -> BoxFuture<'a, Result<FetchResponse, TransportError>> {
        Box::pin(async move {
            self.requests.lock().push(url.to_string());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

            if self.latency.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.latency).await;
            }

            let key = url.split('?').next().unwrap_or(url);
            let reply = self.replies.lock().get(key).cloned();

            let result = match reply {
                Some(Reply::Body { bytes, wire_size }) => {
                    let wire = wire_size.unwrap_or(bytes.len() as u64);
                    for step in 1..=4u64 {
                        on_progress(wire * step / 4, Some(wire));
                        tokio::task::yield_now().await;
                    }
                    Ok(FetchResponse {
                        bytes: Bytes::from(bytes),
                        content_type: None,
                    })
                }
                Some(Reply::Fail(kind)) => Err(TransportError::new(url, kind)),
                None => Err(TransportError::new(url, TransportErrorKind::Status(404))),
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }
}

/// Memory medium that rejects writes to chosen keys.
pub struct FailingStorage {
    inner: MemoryStorage,
    failing: Mutex<Vec<String>>,
}

impl FailingStorage {
    pub fn new() -> Self {
        Self {
            inner: MemoryStorage::new(),
            failing: Mutex::new(Vec::new()),
        }
    }

    /// Reject every write to the content of `path`.
    pub fn fail_writes_to(&self, path: &str) {
        self.failing.lock().push(format!("assets:{}", path));
    }

    /// Reject every write to the persisted hash index.
    pub fn fail_index_writes(&self) {
        self.failing.lock().push(INDEX_KEY.to_string());
    }

    fn rejects(&self, key: &str) -> bool {
        self.failing.lock().iter().any(|k| k == key)
    }
}

impl Storage for FailingStorage {
    fn set(&self, key: &str, value: Vec<u8>) -> BoxFuture<'_, Result<(), StorageError>> {
        if self.rejects(key) {
            let key = key.to_string();
            return Box::pin(async move {
                Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("disk full writing {}", key),
                )))
            });
        }
        self.inner.set(key, value)
    }

    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, StorageError>> {
        self.inner.get(key)
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<bool, StorageError>> {
        self.inner.delete(key)
    }

    fn contains(&self, key: &str) -> BoxFuture<'_, Result<bool, StorageError>> {
        self.inner.contains(key)
    }

    fn keys(&self, prefix: &str) -> BoxFuture<'_, Result<Vec<String>, StorageError>> {
        self.inner.keys(prefix)
    }

    fn size_bytes(&self) -> u64 {
        self.inner.size_bytes()
    }

    fn quota_bytes(&self) -> Option<u64> {
        self.inner.quota_bytes()
    }
}

/// One file of a test application.
pub struct AppFile {
    pub path: String,
    pub body: Vec<u8>,
    pub kind: &'static str,
    pub optional: bool,
}

impl AppFile {
    pub fn script(path: &str, body: &str) -> Self {
        Self {
            path: path.to_string(),
            body: body.as_bytes().to_vec(),
            kind: "js",
            optional: false,
        }
    }

    pub fn stylesheet(path: &str, body: &str) -> Self {
        Self {
            kind: "css",
            ..Self::script(path, body)
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Manifest JSON listing `files` in activation order.
pub fn manifest_json(app_version: &str, files: &[AppFile]) -> String {
    let entries: Vec<String> = files
        .iter()
        .map(|f| {
            format!(
                r#""{}":{{"hash":"{}","size":{},"type":"{}","optional":{}}}"#,
                f.path,
                content_hash(&f.body),
                f.body.len(),
                f.kind,
                f.optional
            )
        })
        .collect();
    let nodes: Vec<String> = files
        .iter()
        .map(|f| {
            format!(
                r#"{{"path":"{}","type":"{}","optional":{}}}"#,
                f.path, f.kind, f.optional
            )
        })
        .collect();
    format!(
        r#"{{"appVersion":"{}","manifestVersion":"1.0.0","files":{{{}}},"domNodes":[{}]}}"#,
        app_version,
        entries.join(","),
        nodes.join(",")
    )
}

/// Serve the manifest and every file body.
pub fn publish(transport: &ScriptedTransport, app_version: &str, files: &[AppFile]) {
    transport.serve("manifest.json", manifest_json(app_version, files));
    for file in files {
        transport.serve(&file.path, file.body.clone());
    }
}

pub fn url(path: &str) -> String {
    format!("{}/{}", HOST, path)
}

pub fn memory_storage() -> Arc<dyn Storage> {
    Arc::new(MemoryStorage::new())
}

/// Collect every event already sent.
pub fn drain(rx: &mut broadcast::Receiver<LoaderEvent>) -> Vec<LoaderEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
