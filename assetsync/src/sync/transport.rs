//! Network transport abstraction.
//!
//! The [`Transport`] trait is the seam between the sync engine and whatever
//! issues requests. [`HttpTransport`] is the reqwest implementation; tests
//! inject scripted transports instead.

use std::fmt;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;

use crate::store::BoxFuture;

/// Default timeout for HTTP requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Upper bound on the body buffer reserved from `Content-Length` (1MB).
const MAX_PREALLOC_BYTES: u64 = 1 << 20;

/// Byte-progress callback: `(bytes received so far, total if reported)`.
///
/// `total` is whatever the transport saw on the wire, which for compressed
/// responses differs from the asset's declared size.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// Classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The request timed out.
    Timeout,
    /// No connection could be established.
    Connect,
    /// The server answered with a non-success status.
    Status(u16),
    /// The response body could not be read.
    Body,
    /// The request could not be built or was abandoned.
    Request,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::Connect => write!(f, "connection failed"),
            Self::Status(code) => write!(f, "HTTP {}", code),
            Self::Body => write!(f, "body read failed"),
            Self::Request => write!(f, "request failed"),
        }
    }
}

/// A failed fetch.
#[derive(Debug, Clone, Error)]
#[error("{url}: {kind}{}", .detail.as_deref().map(|d| format!(" ({})", d)).unwrap_or_default())]
pub struct TransportError {
    /// Requested URL.
    pub url: String,
    /// Failure class.
    pub kind: TransportErrorKind,
    /// Underlying error text, if any.
    pub detail: Option<String>,
}

impl TransportError {
    /// Create an error without detail text.
    pub fn new(url: impl Into<String>, kind: TransportErrorKind) -> Self {
        Self {
            url: url.into(),
            kind,
            detail: None,
        }
    }

    /// Attach detail text.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// HTTP status, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self.kind {
            TransportErrorKind::Status(code) => Some(code),
            _ => None,
        }
    }
}

/// A completed fetch.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Response body.
    pub bytes: Bytes,
    /// `Content-Type` header, if present.
    pub content_type: Option<String>,
}

/// Request/response transport with streaming progress.
pub trait Transport: Send + Sync {
    /// Fetch `url`, calling `on_progress` as body bytes arrive.
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        on_progress: ProgressFn<'a>,
    ) -> BoxFuture<'a, Result<FetchResponse, TransportError>>;
}

/// URL for an asset under `host`.
///
/// With a hash the URL carries it as the query string, so intermediaries
/// can't serve a stale body for new content.
pub fn asset_url(host: &str, path: &str, hash: Option<&str>) -> String {
    match hash {
        Some(hash) => format!("{}/{}?{}", host, path, hash),
        None => format!("{}/{}", host, path),
    }
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport with the default timeout.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a transport with a custom per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                TransportError::new("", TransportErrorKind::Request)
                    .with_detail(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client, timeout })
    }

    /// Configured request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn get(
        &self,
        url: &str,
        on_progress: ProgressFn<'_>,
    ) -> Result<FetchResponse, TransportError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::new(
                url,
                TransportErrorKind::Status(status.as_u16()),
            ));
        }

        let total = response.content_length();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut body = BytesMut::with_capacity(prealloc_len(total));
        while let Some(chunk) = response.chunk().await.map_err(|e| classify(url, e))? {
            body.extend_from_slice(&chunk);
            on_progress(body.len() as u64, total);
        }

        Ok(FetchResponse {
            bytes: body.freeze(),
            content_type,
        })
    }
}

impl Transport for HttpTransport {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        on_progress: ProgressFn<'a>,
    ) -> BoxFuture<'a, Result<FetchResponse, TransportError>> {
        Box::pin(self.get(url, on_progress))
    }
}

/// Initial body buffer size. The header is untrusted, so it only seeds the
/// buffer up to [`MAX_PREALLOC_BYTES`] and the rest grows per chunk.
fn prealloc_len(content_length: Option<u64>) -> usize {
    content_length.map_or(0, |len| len.min(MAX_PREALLOC_BYTES) as usize)
}

fn classify(url: &str, e: reqwest::Error) -> TransportError {
    let kind = if e.is_timeout() {
        TransportErrorKind::Timeout
    } else if e.is_connect() {
        TransportErrorKind::Connect
    } else if let Some(status) = e.status() {
        TransportErrorKind::Status(status.as_u16())
    } else if e.is_body() || e.is_decode() {
        TransportErrorKind::Body
    } else {
        TransportErrorKind::Request
    };
    TransportError::new(url, kind).with_detail(e.to_string())
}
