use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, warn};
use crate::constants::OTHER_BUCKET;
use crate::lookup::{CountryLookup, LookupError};
use crate::sorter::config::LookupConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupStats {
    pub cache_hits: u64,
    pub network_calls: u64,
    pub failures: u64,
    pub cached_domains: u64,
}

/// Memoizing front for a [`CountryLookup`].
///
/// Successful answers are cached for the life of the resolver. Failures are
/// not cached, so the next appearance of the domain asks again. Concurrent
/// misses on the same domain share one request.
pub struct CachedCountryResolver<L> {
    lookup: L,
    limiter: Arc<Semaphore>,
    cache: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
    max_retries: u32,
    retry_backoff: Duration,
    cache_hits: AtomicU64,
    network_calls: AtomicU64,
    failures: AtomicU64,
}

impl<L: CountryLookup> CachedCountryResolver<L> {
    pub fn new(lookup: L, config: &LookupConfig) -> Self {
        Self {
            lookup,
            limiter: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
            cache: Mutex::new(HashMap::new()),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
            cache_hits: AtomicU64::new(0),
            network_calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Resolves `domain` to a country code, or `OTHER` on any failure.
    pub async fn lookup_country(&self, domain: &str) -> String {
        let cell = {
            let mut cache = self.cache.lock();
            cache.entry(domain.to_string()).or_default().clone()
        };

        if let Some(code) = cell.get() {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return code.clone();
        }

        match cell.get_or_try_init(|| self.fetch_with_limit(domain)).await {
            Ok(code) => code.clone(),
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!("Country lookup failed for domain {}: {}", domain, e);
                OTHER_BUCKET.to_string()
            }
        }
    }

    #[cfg(test)]
    pub fn lookup(&self) -> &L {
        &self.lookup
    }

    #[cfg(test)]
    pub fn cached(&self, domain: &str) -> Option<String> {
        self.cache
            .lock()
            .get(domain)
            .and_then(|cell| cell.get().cloned())
    }

    pub fn stats(&self) -> LookupStats {
        let cached_domains = self
            .cache
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count() as u64;

        LookupStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            network_calls: self.network_calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cached_domains,
        }
    }

    async fn fetch_with_limit(&self, domain: &str) -> Result<String, LookupError> {
        let mut attempt = 0;
        loop {
            let result = {
                let _permit = self
                    .limiter
                    .acquire()
                    .await
                    .map_err(|_| LookupError::Transport("lookup limiter closed".into()))?;
                self.network_calls.fetch_add(1, Ordering::Relaxed);
                self.lookup.fetch_country(domain).await
            };

            match result {
                Ok(code) => return Ok(code),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let backoff = self.retry_backoff * 2u32.saturating_pow(attempt);
                    debug!(
                        "Retrying lookup for {} in {:?} (attempt {}/{}): {}",
                        domain,
                        backoff,
                        attempt + 1,
                        self.max_retries,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
