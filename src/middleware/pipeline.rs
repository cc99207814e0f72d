//! Admission pipeline composition.
//!
//! Stacks the three admission stages around a downstream service in a fixed
//! order, outermost first:
//!
//! ```text
//! RequestTracer -> RateLimit -> ApiKeyAuth -> downstream
//! ```
//!
//! Each stage either forwards the request once or answers it itself; a denial
//! from the rate limiter never reaches the authenticator, and neither denial
//! reaches the downstream service. The tracer sees every outcome.

use std::sync::Arc;

use governor::clock::{Clock, DefaultClock};
use tower::Layer;

use super::auth::{ApiKeyAuth, ApiKeyAuthService};
use super::rate_limit::{RateLimitError, RateLimitLayer, RateLimitService, RateLimiter};
use super::tracer::{RequestTracerLayer, RequestTracerService};
use crate::config::Config;

/// Service produced by [`AdmissionPipeline`].
pub type AdmissionService<S, C = DefaultClock> =
    RequestTracerService<RateLimitService<ApiKeyAuthService<S>, C>>;

/// The composed admission layer.
pub struct AdmissionPipeline<C: Clock = DefaultClock> {
    tracer: RequestTracerLayer,
    rate_limit: RateLimitLayer<C>,
    auth: ApiKeyAuth,
}

impl<C: Clock> Clone for AdmissionPipeline<C> {
    fn clone(&self) -> Self {
        Self {
            tracer: self.tracer.clone(),
            rate_limit: self.rate_limit.clone(),
            auth: self.auth.clone(),
        }
    }
}

impl AdmissionPipeline<DefaultClock> {
    /// Build all three stages from configuration with a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns a [`RateLimitError`] when a quota is zero.
    pub fn from_config(config: &Config) -> Result<Self, RateLimitError> {
        let limiter = RateLimiter::from_config(config)?;
        Ok(Self::with_limiter(config, Arc::new(limiter)))
    }
}

impl<C: Clock> AdmissionPipeline<C> {
    /// Build the pipeline around an existing registry.
    pub fn with_limiter(config: &Config, limiter: Arc<RateLimiter<C>>) -> Self {
        Self::new(
            RequestTracerLayer::from_config(config),
            RateLimitLayer::new(limiter),
            ApiKeyAuth::from_config(config),
        )
    }

    pub fn new(tracer: RequestTracerLayer, rate_limit: RateLimitLayer<C>, auth: ApiKeyAuth) -> Self {
        Self {
            tracer,
            rate_limit,
            auth,
        }
    }

    /// The registry shared by every service this layer produces.
    pub fn limiter(&self) -> &Arc<RateLimiter<C>> {
        self.rate_limit.limiter()
    }
}

impl<S, C: Clock> Layer<S> for AdmissionPipeline<C> {
    type Service = AdmissionService<S, C>;

    fn layer(&self, inner: S) -> Self::Service {
        let authenticated = self.auth.layer(inner);
        let limited = self.rate_limit.layer(authenticated);
        self.tracer.layer(limited)
    }
}
