//! Host resolution.
//!
//! A session starts by asking a [`HostResolver`] which host to fetch from.
//! Embedders can plug in discovery (a preferred server, a region lookup);
//! [`StaticHost`] just returns a fixed value.

use thiserror::Error;

use crate::store::BoxFuture;

/// Failure to determine a host.
#[derive(Debug, Clone, Error)]
#[error("host resolution failed: {0}")]
pub struct HostResolveError(pub String);

/// Decides the host prefix for a session.
pub trait HostResolver: Send + Sync {
    /// The host to use, or `None` to fall back to the configured host.
    fn resolve(&self) -> BoxFuture<'_, Result<Option<String>, HostResolveError>>;
}

/// Always resolves to the same host.
#[derive(Debug, Clone, Default)]
pub struct StaticHost {
    host: Option<String>,
}

impl StaticHost {
    pub fn new(host: Option<String>) -> Self {
        Self { host }
    }
}

impl HostResolver for StaticHost {
    fn resolve(&self) -> BoxFuture<'_, Result<Option<String>, HostResolveError>> {
        let host = self.host.clone();
        Box::pin(async move { Ok(host) })
    }
}
