//! Single choke point for outbound requests.
//!
//! Concurrent calls for the same `(method, url)` share one physical request.
//! Rate-limit, SSL-handshake and timeout statuses are retried on that shared
//! request with exponential backoff; everything else is handed back as-is.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{Result, ScrapeError};
use crate::traits::{FetchRequest, FetchResponse, Method, Transport, TransportError};

/// Synthetic status for a transport-level timeout.
pub const STATUS_TIMEOUT: u16 = 408;
/// Synthetic status for any other transport failure.
pub const STATUS_TRANSPORT_FAILURE: u16 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    RateLimited,
    SslHandshake,
    Timeout,
}

impl RetryClass {
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            429 => Some(Self::RateLimited),
            525 | 526 => Some(Self::SslHandshake),
            408 | 504 | 522 | 524 => Some(Self::Timeout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    rate_limited_base: Duration,
    ssl_handshake_base: Duration,
    timeout_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        rate_limited_base: Duration,
        ssl_handshake_base: Duration,
        timeout_base: Duration,
    ) -> Self {
        Self {
            max_retries,
            rate_limited_base,
            ssl_handshake_base,
            timeout_base,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.rate_limited_delay_ms),
            Duration::from_millis(config.ssl_handshake_delay_ms),
            Duration::from_millis(config.timeout_delay_ms),
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_delay(&self, class: RetryClass) -> Duration {
        match class {
            RetryClass::RateLimited => self.rate_limited_base,
            RetryClass::SslHandshake => self.ssl_handshake_base,
            RetryClass::Timeout => self.timeout_base,
        }
    }

    /// `base * 2^(max_retries - retries_left)`
    pub fn delay(&self, class: RetryClass, retries_left: u32) -> Duration {
        let exponent = self.max_retries.saturating_sub(retries_left).min(16);
        self.base_delay(class).saturating_mul(1u32 << exponent)
    }
}

type SharedFetch = Shared<BoxFuture<'static, FetchResponse>>;
type PendingMap = Arc<Mutex<HashMap<RequestKey, PendingEntry>>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RequestKey {
    method: Method,
    url: String,
}

struct PendingEntry {
    id: u64,
    fetch: WeakShared<BoxFuture<'static, FetchResponse>>,
}

/// Lives inside the shared request future. Dropping it (completion, or the
/// last waiter going away) removes the entry it was registered under.
struct PendingGuard {
    pending: PendingMap,
    key: RequestKey,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut pending = lock(&self.pending);
        if pending.get(&self.key).is_some_and(|entry| entry.id == self.id) {
            pending.remove(&self.key);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct FetchGateway {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    limiter: Option<Arc<DefaultKeyedRateLimiter<String>>>,
    pending: PendingMap,
    next_id: AtomicU64,
    physical_requests: Arc<AtomicU64>,
}

impl FetchGateway {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            limiter: None,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            physical_requests: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &GatewayConfig) -> Self {
        Self::new(transport, RetryPolicy::from_config(config))
            .with_min_interval(Duration::from_millis(config.min_request_interval_ms))
    }

    /// Spaces physical requests to the same host at least `interval` apart.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.limiter = Quota::with_period(interval).map(|quota| Arc::new(RateLimiter::keyed(quota)));
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Physical transport calls issued so far, retries included.
    pub fn physical_requests(&self) -> u64 {
        self.physical_requests.load(Ordering::SeqCst)
    }

    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }

    pub async fn get(&self, url: &str, cancel: &CancellationToken) -> Result<FetchResponse> {
        self.fetch(url, Method::Get, cancel).await
    }

    pub async fn head(&self, url: &str, cancel: &CancellationToken) -> Result<FetchResponse> {
        self.fetch(url, Method::Head, cancel).await
    }

    /// Never fails on HTTP status. The only error is `ScrapeError::Cancelled`.
    pub async fn fetch(&self, url: &str, method: Method, cancel: &CancellationToken) -> Result<FetchResponse> {
        if cancel.is_cancelled() {
            return Err(ScrapeError::Cancelled);
        }

        let shared = self.join_or_start(RequestKey {
            method,
            url: url.to_string(),
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("[GATEWAY] cancelled while waiting for {} {}", method, url);
                Err(ScrapeError::Cancelled)
            }
            response = shared => Ok(response),
        }
    }

    fn join_or_start(&self, key: RequestKey) -> SharedFetch {
        let mut pending = lock(&self.pending);

        if let Some(existing) = pending.get(&key).and_then(|entry| entry.fetch.upgrade()) {
            debug!("[GATEWAY] joining in-flight {} {}", key.method, key.url);
            return existing;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            key: key.clone(),
            id,
        };
        let request = FetchRequest {
            url: key.url.clone(),
            method: key.method,
        };
        let fetch = perform(
            Arc::clone(&self.transport),
            self.policy.clone(),
            self.limiter.clone(),
            Arc::clone(&self.physical_requests),
            request,
            guard,
        )
        .boxed()
        .shared();

        if let Some(weak) = fetch.downgrade() {
            pending.insert(key, PendingEntry { id, fetch: weak });
        }
        fetch
    }
}

async fn perform(
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    limiter: Option<Arc<DefaultKeyedRateLimiter<String>>>,
    counter: Arc<AtomicU64>,
    request: FetchRequest,
    _guard: PendingGuard,
) -> FetchResponse {
    let host = url::Url::parse(&request.url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();
    let mut retries_left = policy.max_retries();

    loop {
        if let Some(limiter) = &limiter {
            limiter.until_key_ready(&host).await;
        }

        counter.fetch_add(1, Ordering::SeqCst);
        let response = match transport.fetch(&request).await {
            Ok(response) => response,
            Err(TransportError::Timeout) => {
                debug!("[GATEWAY] {} {} timed out in transport", request.method, request.url);
                FetchResponse::new(STATUS_TIMEOUT, "")
            }
            Err(e) => {
                warn!("[GATEWAY] {} {} failed: {}", request.method, request.url, e);
                FetchResponse::new(STATUS_TRANSPORT_FAILURE, "")
            }
        };

        let Some(class) = RetryClass::from_status(response.status) else {
            return response;
        };

        if retries_left == 0 {
            warn!(
                "[GATEWAY] retries exhausted for {} {} (status {})",
                request.method, request.url, response.status
            );
            return response;
        }

        let delay = policy.delay(class, retries_left);
        retries_left -= 1;
        debug!(
            "[GATEWAY] {:?} status {} for {}, retrying in {:?} ({} left)",
            class, response.status, request.url, delay, retries_left
        );
        tokio::time::sleep(delay).await;
    }
}
