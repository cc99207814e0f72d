//! Per-client rate limiting with a dual token bucket.
//!
//! # Client Keys
//!
//! Quotas are tracked per [`ClientKey`], derived in priority order:
//!
//! 1. `apikey:<first 8 chars of X-API-Key>` when the header is present and not blank
//! 2. `ip:<first X-Forwarded-For entry>`
//! 3. `ip:<peer address>` (or `ip:unknown`)
//!
//! The `apikey:`/`ip:` namespaces keep the two derivations from colliding.
//! Only a prefix of the key is used, so an invalid key shares its quota with
//! every other key starting with the same 8 characters.
//!
//! # Algorithm
//!
//! See [`super::bucket`]: a sustained limit (default 60/min, continuous refill)
//! and a burst limit (default 10, refilled every second). Both must have a
//! token for the request to pass.
//!
//! # Registry
//!
//! [`RateLimiter`] owns a `DashMap` from key to bucket. Buckets are created on
//! first sight through `entry()`, which holds the shard lock, so concurrent
//! first requests for one key still produce a single bucket. Token accounting
//! runs under the same shard lock and the lock is released before the inner
//! service is called. Buckets are never evicted.
//!
//! # Response
//!
//! On denial: `429`, `Retry-After: 60`, JSON envelope with
//! `"Rate limit exceeded. Please try again later."`.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Json;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use axum::response::IntoResponse;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use governor::clock::{Clock, DefaultClock};
use tower::{Layer, Service};
use tracing::{trace, warn};

use super::auth::API_KEY_HEADER;
use super::bucket::{BucketLimits, Exhausted, RateBucket};
use super::ip::{ClientAddr, resolve_client_addr};
use crate::config::Config;
use crate::metrics;
use crate::models::ApiResponse;

/// Number of API key characters that identify a client.
pub const API_KEY_PREFIX_LEN: usize = 8;

/// Seconds advertised in `Retry-After` on every denial.
pub const RETRY_AFTER_SECS: u64 = 60;

/// Message returned in the 429 body.
pub const RATE_LIMIT_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

/// Error type for rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// Requests-per-minute cannot be zero.
    ZeroRequestsPerMinute,
    /// Burst capacity cannot be zero.
    ZeroBurstCapacity,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::ZeroRequestsPerMinute => {
                write!(f, "requests per minute must be greater than 0")
            }
            RateLimitError::ZeroBurstCapacity => write!(f, "burst capacity must be greater than 0"),
        }
    }
}

impl std::error::Error for RateLimitError {}

/// Build bucket limits from raw quota numbers.
///
/// # Errors
///
/// Returns a [`RateLimitError`] when either quota is zero.
pub fn limits_from_quotas(per_minute: u32, burst: u32) -> Result<BucketLimits, RateLimitError> {
    let per_minute = NonZeroU32::new(per_minute).ok_or(RateLimitError::ZeroRequestsPerMinute)?;
    let burst = NonZeroU32::new(burst).ok_or(RateLimitError::ZeroBurstCapacity)?;
    Ok(BucketLimits::new(per_minute, burst))
}

// =============================================================================
// Client Key
// =============================================================================

/// Identity a caller is rate limited by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    /// Derive a key from an optional API key header value and a resolved address.
    pub fn new(api_key: Option<&str>, addr: ClientAddr<'_>) -> Self {
        match api_key.filter(|k| !k.trim().is_empty()) {
            Some(key) => {
                let prefix: String = key.chars().take(API_KEY_PREFIX_LEN).collect();
                Self(format!("apikey:{prefix}"))
            }
            None => Self(format!("ip:{addr}")),
        }
    }

    /// Derive the key for a request.
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let api_key = req
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        Self::new(api_key, resolve_client_addr(req))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Concurrent registry of per-client buckets.
///
/// Construct one per service instance and share it through an `Arc`; the
/// layer never reaches for global state, so tests can inject a limiter driven
/// by a fake clock.
pub struct RateLimiter<C: Clock = DefaultClock> {
    buckets: DashMap<ClientKey, RateBucket<C::Instant>>,
    limits: BucketLimits,
    clock: C,
}

impl RateLimiter<DefaultClock> {
    /// Create a limiter on the monotonic system clock.
    pub fn new(limits: BucketLimits) -> Self {
        Self::with_clock(limits, DefaultClock::default())
    }

    /// Create a limiter from the configured quotas.
    ///
    /// # Errors
    ///
    /// Returns a [`RateLimitError`] when a quota is zero.
    pub fn from_config(config: &Config) -> Result<Self, RateLimitError> {
        limits_from_quotas(
            config.rate_limit_requests_per_minute,
            config.rate_limit_burst_capacity,
        )
        .map(Self::new)
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Create a limiter reading time from `clock`.
    pub fn with_clock(limits: BucketLimits, clock: C) -> Self {
        Self {
            buckets: DashMap::new(),
            limits,
            clock,
        }
    }

    /// Consume one token for `key`, creating its bucket on first use.
    pub fn check(&self, key: &ClientKey) -> Result<(), Exhausted> {
        let now = self.clock.now();

        let (outcome, created) = match self.buckets.entry(key.clone()) {
            Entry::Occupied(mut entry) => (entry.get_mut().try_consume(now), false),
            Entry::Vacant(entry) => {
                let mut bucket = RateBucket::new(self.limits, now);
                let outcome = bucket.try_consume(now);
                entry.insert(bucket);
                (outcome, true)
            }
        };

        // shard lock is released here; len() would deadlock while holding it
        if created {
            let count = self.buckets.len();
            trace!(client_key = %key, buckets = count, "Created rate bucket");
            metrics::set_bucket_count(count);
        }

        outcome
    }

    /// Tokens left for `key` as `(sustained, burst)`, if it has a bucket.
    pub fn available(&self, key: &ClientKey) -> Option<(u64, u64)> {
        let now = self.clock.now();
        self.buckets
            .get_mut(key)
            .map(|mut bucket| bucket.available(now))
    }

    /// Number of tracked client keys.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn limits(&self) -> &BucketLimits {
        &self.limits
    }
}

// =============================================================================
// Tower Layer
// =============================================================================

/// Rate limiting layer for the Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let limiter = Arc::new(RateLimiter::from_config(&config)?);
/// let app = Router::new()
///     .route("/api", get(handler))
///     .layer(RateLimitLayer::new(limiter));
/// ```
pub struct RateLimitLayer<C: Clock = DefaultClock> {
    limiter: Arc<RateLimiter<C>>,
}

// Manual impl: governor's `Clock` is not `Clone`, only the `Arc` is cloned
impl<C: Clock> Clone for RateLimitLayer<C> {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
        }
    }
}

impl<C: Clock> RateLimitLayer<C> {
    pub fn new(limiter: Arc<RateLimiter<C>>) -> Self {
        Self { limiter }
    }

    /// The shared registry behind this layer.
    pub fn limiter(&self) -> &Arc<RateLimiter<C>> {
        &self.limiter
    }
}

impl<S, C: Clock> Layer<S> for RateLimitLayer<C> {
    type Service = RateLimitService<S, C>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

/// Rate limiting service wrapper.
pub struct RateLimitService<S, C: Clock = DefaultClock> {
    inner: S,
    limiter: Arc<RateLimiter<C>>,
}

impl<S: Clone, C: Clock> Clone for RateLimitService<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
        }
    }
}

impl<S, C> Service<Request<Body>> for RateLimitService<S, C>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
    C: Clock,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // Decide before building the future so no registry state is held
        // while the rest of the chain runs
        let client_key = ClientKey::from_request(&req);

        match self.limiter.check(&client_key) {
            Ok(()) => {
                // Call the instance that was polled ready, leave a fresh clone behind
                let clone = self.inner.clone();
                let mut inner = std::mem::replace(&mut self.inner, clone);
                Box::pin(async move { inner.call(req).await })
            }
            Err(exhausted) => {
                warn!(
                    client_key = %client_key,
                    path = %req.uri().path(),
                    limit = %exhausted,
                    "Rate limit exceeded for client"
                );
                metrics::record_rate_limited(exhausted.as_str());

                Box::pin(async move { Ok(rate_limited_response()) })
            }
        }
    }
}

/// Build the 429 denial response.
pub fn rate_limited_response() -> Response<Body> {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, RETRY_AFTER_SECS.to_string())],
        Json(ApiResponse::error(RATE_LIMIT_MESSAGE)),
    )
        .into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    use axum::extract::ConnectInfo;
    use governor::clock::FakeRelativeClock;

    fn fake_limiter(per_minute: u32, burst: u32) -> (FakeRelativeClock, RateLimiter<FakeRelativeClock>) {
        let clock = FakeRelativeClock::default();
        let limiter =
            RateLimiter::with_clock(limits_from_quotas(per_minute, burst).unwrap(), clock.clone());
        (clock, limiter)
    }

    #[test]
    fn test_zero_quotas_rejected() {
        assert_eq!(
            limits_from_quotas(0, 10).unwrap_err(),
            RateLimitError::ZeroRequestsPerMinute
        );
        assert_eq!(
            limits_from_quotas(60, 0).unwrap_err(),
            RateLimitError::ZeroBurstCapacity
        );
    }

    #[test]
    fn test_from_config_uses_quotas() {
        let limiter = RateLimiter::from_config(&Config::default()).unwrap();
        assert_eq!(limiter.limits().sustained.capacity(), 60);
        assert_eq!(limiter.limits().burst.capacity(), 10);
    }

    // ==========================================================================
    // Client Key Derivation
    // ==========================================================================

    #[test]
    fn test_client_key_uses_api_key_prefix() {
        let req = Request::builder()
            .header("x-api-key", "abcdefghijklmnop")
            .header("x-forwarded-for", "1.2.3.4")
            .body(Body::empty())
            .unwrap();

        assert_eq!(ClientKey::from_request(&req).as_str(), "apikey:abcdefgh");
    }

    #[test]
    fn test_client_key_short_api_key() {
        let key = ClientKey::new(Some("abc"), ClientAddr::Unknown);
        assert_eq!(key.as_str(), "apikey:abc");
    }

    #[test]
    fn test_client_key_prefix_counts_characters() {
        let key = ClientKey::new(Some("ключ-доступа"), ClientAddr::Unknown);
        assert_eq!(key.as_str(), "apikey:ключ-дос");
    }

    #[test]
    fn test_client_key_blank_api_key_falls_back_to_forwarded() {
        let req = Request::builder()
            .header("x-api-key", "   ")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(ClientKey::from_request(&req).as_str(), "ip:203.0.113.9");
    }

    #[test]
    fn test_client_key_peer_address() {
        let mut req = Request::builder().body(Body::empty()).unwrap();
        let addr: SocketAddr = "192.0.2.7:51000".parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));

        assert_eq!(ClientKey::from_request(&req).as_str(), "ip:192.0.2.7");
    }

    #[test]
    fn test_client_key_unknown() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(ClientKey::from_request(&req).to_string(), "ip:unknown");
    }

    #[test]
    fn test_client_key_namespaces_do_not_collide() {
        let by_key = ClientKey::new(Some("10.0.0.1"), ClientAddr::Unknown);
        let by_ip = ClientKey::new(None, ClientAddr::Forwarded("10.0.0.1"));
        assert_ne!(by_key, by_ip);
    }

    // ==========================================================================
    // Registry
    // ==========================================================================

    #[test]
    fn test_quota_ceiling() {
        let (_clock, limiter) = fake_limiter(60, 10);
        let key = ClientKey::new(Some("client-a"), ClientAddr::Unknown);

        let allowed = (0..11).filter(|_| limiter.check(&key).is_ok()).count();
        assert_eq!(allowed, 10);
        assert_eq!(limiter.check(&key), Err(Exhausted::Burst));
    }

    #[test]
    fn test_independent_budgets() {
        let (_clock, limiter) = fake_limiter(60, 10);
        let a = ClientKey::new(Some("aaaaaaaa-1"), ClientAddr::Unknown);
        let b = ClientKey::new(Some("bbbbbbbb-1"), ClientAddr::Unknown);

        for _ in 0..10 {
            limiter.check(&a).unwrap();
        }
        assert!(limiter.check(&a).is_err());

        for _ in 0..10 {
            limiter.check(&b).unwrap();
        }
        assert_eq!(limiter.bucket_count(), 2);
        assert_eq!(limiter.available(&a), Some((50, 0)));
        assert_eq!(limiter.available(&b), Some((50, 0)));
    }

    #[test]
    fn test_sustained_quota_spans_bursts() {
        let (clock, limiter) = fake_limiter(60, 10);
        let key = ClientKey::new(None, ClientAddr::Forwarded("198.51.100.2"));

        let mut allowed = 0;
        for _ in 0..10 {
            allowed += (0..10).filter(|_| limiter.check(&key).is_ok()).count();
            clock.advance(Duration::from_secs(1));
        }
        // 60 initial tokens plus one per elapsed second
        assert_eq!(allowed, 69);
    }

    #[test]
    fn test_available_unknown_key() {
        let (_clock, limiter) = fake_limiter(60, 10);
        let key = ClientKey::new(None, ClientAddr::Unknown);
        assert!(limiter.available(&key).is_none());
    }

    #[test]
    fn test_concurrent_first_requests_share_one_bucket() {
        let (_clock, limiter) = fake_limiter(1000, 1000);
        let key = ClientKey::new(Some("same-client"), ClientAddr::Unknown);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        limiter.check(&key).unwrap();
                    }
                });
            }
        });

        assert_eq!(limiter.bucket_count(), 1);
        assert_eq!(limiter.available(&key), Some((800, 800)));
    }

    #[test]
    fn test_concurrent_consumers_never_overdraw() {
        let (_clock, limiter) = fake_limiter(60, 10);
        let key = ClientKey::new(Some("contended"), ClientAddr::Unknown);
        let allowed = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..5 {
                        if limiter.check(&key).is_ok() {
                            allowed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(allowed.load(std::sync::atomic::Ordering::SeqCst), 10);
    }
}
