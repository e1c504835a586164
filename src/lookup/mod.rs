//! Remote domain to country resolution.
//!
//! [`CountryLookup`] is the network seam: one call per domain, no caching, no
//! limits. [`CachedCountryResolver`] wraps any lookup with the per-run cache,
//! the global in-flight limit, optional retry and the fall back to `OTHER`.

pub mod cache;
pub mod http;

pub use cache::{CachedCountryResolver, LookupStats};
pub use http::HttpCountryClient;

use std::future::Future;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("empty response body")]
    EmptyBody,
}

impl LookupError {
    /// Failures worth another attempt when retries are configured.
    pub fn is_transient(&self) -> bool {
        match self {
            LookupError::Timeout | LookupError::Transport(_) => true,
            LookupError::Status(status) => *status >= 500,
            LookupError::EmptyBody => false,
        }
    }
}

pub trait CountryLookup: Send + Sync + 'static {
    /// Resolves one domain with a single request and returns the raw code.
    fn fetch_country(&self, domain: &str) -> impl Future<Output = Result<String, LookupError>> + Send;
}
