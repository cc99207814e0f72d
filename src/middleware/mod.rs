//! HTTP admission middleware.
//!
//! Every request passes three stages before any handler runs:
//!
//! - **Request Tracer**: correlation id, inbound/outbound log lines, a bounded
//!   copy of the body as downstream reads it
//! - **Rate Limiter**: dual token bucket per client key
//! - **Authenticator**: shared-secret `X-API-Key` check with a public path table
//!
//! # Architecture
//!
//! ```text
//! Request → Tracer → Rate Limiter → Auth → Handler → Response
//!             ↓           ↓            ↓
//!       X-Request-Id  429 Too Many  401 Unauth
//! ```
//!
//! [`AdmissionPipeline`] composes the stages in this order.

pub mod auth;
pub mod bucket;
pub mod ip;
pub mod pipeline;
pub mod rate_limit;
pub mod tracer;

pub use auth::{ApiKeyAuth, BypassPath, Identity, Role};
pub use bucket::{Bandwidth, BucketLimits, Exhausted, RateBucket, Refill};
pub use ip::{ClientAddr, UNKNOWN_IP, resolve_client_addr};
pub use pipeline::{AdmissionPipeline, AdmissionService};
pub use rate_limit::{ClientKey, RateLimitError, RateLimitLayer, RateLimiter};
pub use tracer::{CachedBody, REQUEST_ID_HEADER, RequestTracerLayer};
