//! Request gateway
//!
//! Every remote call goes through [`Gateway::call`], which layers, in order:
//! response caching for reads, in-flight de-duplication, reactive rate
//! limiting, bearer-token injection, per-attempt timeouts and retry with
//! exponential backoff for transport faults.

pub mod cache;
pub mod key;
#[cfg(test)]
pub mod mock;
pub mod rate_limit;
pub mod response;
pub mod transport;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use log::{debug, info, warn};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::config::{Config, GatewayConfig};
use crate::error::{ApiError, Error, Result};
use crate::store::{PersistentStore, StoreExt, keys};

pub use cache::{CacheStats, ResponseCache};
pub use key::cache_key;
pub use rate_limit::{EndpointCategory, RateLimiterSet};
pub use transport::{HttpTransport, OutboundRequest, RawResponse, Transport};

type CallResult = std::result::Result<Value, ApiError>;
type SharedCall = Shared<BoxFuture<'static, CallResult>>;

/// Per-call options
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Skip the response cache for this call
    pub no_cache: bool,
    /// Per-attempt deadline (defaults to the gateway's)
    pub timeout: Option<Duration>,
    /// Total attempts (defaults to the gateway's)
    pub attempts: Option<u32>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self::get()
    }
}

impl CallOptions {
    fn with_method(method: Method, body: Option<Value>) -> Self {
        Self {
            method,
            headers: Vec::new(),
            body,
            no_cache: false,
            timeout: None,
            attempts: None,
        }
    }

    pub fn get() -> Self {
        Self::with_method(Method::GET, None)
    }

    pub fn post(body: Value) -> Self {
        Self::with_method(Method::POST, Some(body))
    }

    pub fn put(body: Value) -> Self {
        Self::with_method(Method::PUT, Some(body))
    }

    pub fn delete() -> Self {
        Self::with_method(Method::DELETE, None)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.no_cache = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn idempotency_key(self, key: impl Into<String>) -> Self {
        self.header("Idempotency-Key", key)
    }

    fn idempotency(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("Idempotency-Key"))
            .map(|(_, value)| value.as_str())
    }

    fn is_cacheable(&self) -> bool {
        self.method == Method::GET && !self.no_cache
    }
}

/// Shared request gateway. Cheap to clone; clones share cache and in-flight map.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    base_url: String,
    language: String,
    config: GatewayConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn PersistentStore>,
    cache: Mutex<ResponseCache>,
    in_flight: Mutex<HashMap<String, SharedCall>>,
    limiters: RateLimiterSet,
    dispatched: AtomicU64,
}

/// Lock a std mutex, recovering the data if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Gateway {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        store: Arc<dyn PersistentStore>,
    ) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                base_url: config.api_base_url.trim_end_matches('/').to_string(),
                language: config.language.clone(),
                config: config.gateway.clone(),
                transport,
                store,
                cache: Mutex::new(ResponseCache::new(config.gateway.cache_duration())),
                in_flight: Mutex::new(HashMap::new()),
                limiters: RateLimiterSet::new(),
                dispatched: AtomicU64::new(0),
            }),
        }
    }

    /// Issue a remote call.
    ///
    /// Cacheable reads are served from the cache while fresh. Otherwise an
    /// identical outstanding call is joined instead of dispatching again.
    pub async fn call(&self, endpoint: &str, options: CallOptions) -> Result<Value> {
        let key = cache_key(
            &options.method,
            endpoint,
            options.body.as_ref(),
            options.idempotency(),
        );

        let cached = if options.is_cacheable() {
            lock(&self.inner.cache).get(&key)
        } else {
            None
        };
        if let Some(hit) = cached {
            debug!("Cache hit: {} {}", options.method, endpoint);
            return Ok(hit);
        }

        let shared = {
            let mut in_flight = lock(&self.inner.in_flight);
            match in_flight.get(&key) {
                Some(existing) => {
                    debug!("Joining in-flight request: {} {}", options.method, endpoint);
                    existing.clone()
                }
                None => {
                    let call = self.start_call(key.clone(), endpoint.to_string(), options);
                    in_flight.insert(key, call.clone());
                    call
                }
            }
        };

        shared.await.map_err(Error::from)
    }

    /// Typed variant of [`Gateway::call`]
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: CallOptions,
    ) -> Result<T> {
        let value = self.call(endpoint, options).await?;
        serde_json::from_value(value).map_err(|e| {
            ApiError::InvalidResponse(format!("Unexpected response shape from {}: {}", endpoint, e))
                .into()
        })
    }

    fn start_call(&self, key: String, endpoint: String, options: CallOptions) -> SharedCall {
        let inner = self.inner.clone();
        async move {
            let result = inner.dispatch_with_retry(&endpoint, &options).await;
            inner.settle(&key, &endpoint, &options, &result);
            result
        }
        .boxed()
        .shared()
    }

    /// Fire-and-forget delivery for shutdown paths: one attempt, no retry,
    /// outcome only logged. The returned handle may be dropped.
    pub fn beacon(&self, endpoint: &str, body: Value) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let options = CallOptions::post(body);
        let request = inner.build_request(endpoint, &options, inner.config.request_timeout());
        let endpoint = endpoint.to_string();
        tokio::spawn(async move {
            inner.dispatched.fetch_add(1, Ordering::SeqCst);
            match inner.transport.send(request).await {
                Ok(raw) if (200..300).contains(&raw.status) => {
                    debug!("Beacon to {} delivered", endpoint)
                }
                Ok(raw) => debug!("Beacon to {} rejected with {}", endpoint, raw.status),
                Err(e) => debug!("Beacon to {} failed: {}", endpoint, e),
            }
        })
    }

    /// Drop cached responses for endpoints starting with `prefix`
    pub fn invalidate(&self, prefix: &str) -> usize {
        lock(&self.inner.cache).invalidate_prefix(prefix)
    }

    pub fn clear_cache(&self) -> usize {
        lock(&self.inner.cache).clear()
    }

    /// Evict expired entries now
    pub fn sweep_cache(&self) -> usize {
        lock(&self.inner.cache).sweep()
    }

    pub fn cache_stats(&self) -> CacheStats {
        lock(&self.inner.cache).stats()
    }

    /// Number of outstanding de-duplicated calls
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.in_flight).len()
    }

    /// Total transport attempts issued since construction
    pub fn dispatched(&self) -> u64 {
        self.inner.dispatched.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> &Arc<dyn PersistentStore> {
        &self.inner.store
    }

    /// Periodically evict expired cache entries
    pub fn spawn_cache_sweeper(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let period = inner.config.cache_sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let evicted = lock(&inner.cache).sweep();
                if evicted > 0 {
                    debug!("Cache sweep evicted {} entries", evicted);
                }
            }
        })
    }
}

impl GatewayInner {
    async fn dispatch_with_retry(&self, endpoint: &str, options: &CallOptions) -> CallResult {
        let attempts = options.attempts.unwrap_or(self.config.max_attempts).max(1);
        let timeout = options.timeout.unwrap_or_else(|| self.config.request_timeout());
        let mut attempt: u32 = 0;

        loop {
            match self.dispatch_once(endpoint, options, timeout).await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(
                            "{} {} succeeded after {} retries",
                            options.method, endpoint, attempt
                        );
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.config.backoff_base() * 2u32.saturating_pow(attempt);
                    warn!(
                        "{} {} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        options.method,
                        endpoint,
                        attempt + 1,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn dispatch_once(
        &self,
        endpoint: &str,
        options: &CallOptions,
        timeout: Duration,
    ) -> CallResult {
        let category = EndpointCategory::of(endpoint, &options.method);
        self.limiters.wait_for(category).await;

        let request = self.build_request(endpoint, options, timeout);
        self.dispatched.fetch_add(1, Ordering::SeqCst);

        // Dropping the send future on timeout cancels the underlying request
        let raw = match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(result) => result?,
            Err(_) => return Err(ApiError::Timeout(timeout)),
        };

        let result = response::normalize(raw);
        if let Err(ApiError::RateLimited(retry_after)) = result {
            self.limiters.throttle(category, retry_after);
        }
        result
    }

    fn build_request(
        &self,
        endpoint: &str,
        options: &CallOptions,
        timeout: Duration,
    ) -> OutboundRequest {
        let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        };

        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
            ("Accept-Language".to_string(), self.language.clone()),
        ];

        match self.store.get_string(keys::AUTH_TOKEN) {
            Ok(Some(token)) => headers.push(("Authorization".to_string(), format!("Bearer {}", token))),
            Ok(None) => {}
            Err(e) => warn!("Could not read auth token, sending unauthenticated: {}", e),
        }

        headers.extend(options.headers.iter().cloned());

        OutboundRequest {
            method: options.method.clone(),
            url,
            headers,
            body: options.body.clone(),
            timeout,
        }
    }

    /// Runs once per shared call, whatever the outcome
    fn settle(&self, key: &str, endpoint: &str, options: &CallOptions, result: &CallResult) {
        if let Ok(value) = result {
            let mut cache = lock(&self.cache);
            if options.is_cacheable() {
                cache.put(key.to_string(), endpoint, value.clone());
            } else if options.method != Method::GET {
                let path = endpoint.split('?').next().unwrap_or(endpoint);
                let invalidated = cache.invalidate_prefix(path);
                if invalidated > 0 {
                    debug!("{} {} invalidated {} cached entries", options.method, endpoint, invalidated);
                }
            }
        }
        lock(&self.in_flight).remove(key);
    }
}
