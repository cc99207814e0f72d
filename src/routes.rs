//! Application routing with the admission pipeline.
//!
//! # Middleware Stack
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │  Request Tracer  │ ← inbound/outbound log, X-Request-Id
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded (public paths included)
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │  Authentication  │ ← 401 if missing/invalid (bypassed for public paths)
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │   Catch Panic    │ ← handler panics become a 500 envelope
//! └────────┬─────────┘
//!          │
//!          ▼
//!      Handler
//! ```
//!
//! # Route Groups
//!
//! - `/` - Service banner (public)
//! - `/api/v1/health`, `/ready`, `/live` - Health probes (public)
//! - `/api/v1/identity` - Caller identity (authenticated)
//! - everything the downstream router defines (authenticated unless listed
//!   in the bypass table)

use std::any::Any;

use axum::Router;
use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::Response;
use axum::response::IntoResponse;
use axum::routing::get;
use governor::clock::Clock;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::info;

use crate::error::AppError;
use crate::handlers;
use crate::middleware::{AdmissionPipeline, RateLimitError};
use crate::state::AppState;

/// Build the application router around a downstream service router.
///
/// `downstream` is the storage service's own router (sessions, messages, ...);
/// it is merged with the host routes and everything sits behind the admission
/// pipeline. A fallback set on `downstream` is replaced by the 404 envelope.
///
/// # Errors
///
/// Returns `RateLimitError` if a configured quota is zero.
pub fn build_router(state: AppState, downstream: Router) -> Result<Router, RateLimitError> {
    let pipeline = AdmissionPipeline::from_config(&state.config)?;

    info!(
        requests_per_minute = state.config.rate_limit_requests_per_minute,
        burst_capacity = state.config.rate_limit_burst_capacity,
        "Rate limiting enabled"
    );
    info!(
        bypass_paths = state.config.auth_bypass_paths.len(),
        "API key authentication enabled"
    );

    Ok(build_router_with_pipeline(state, downstream, pipeline))
}

/// Same as [`build_router`], with a caller-built pipeline (e.g. one whose
/// limiter runs on a fake clock).
pub fn build_router_with_pipeline<C>(
    state: AppState,
    downstream: Router,
    pipeline: AdmissionPipeline<C>,
) -> Router
where
    C: Clock + Send + Sync + 'static,
{
    let max_body_size = state.config.max_request_body_size;

    Router::new()
        .route("/", get(handlers::root))
        .route("/api/v1/health", get(handlers::health_check))
        .route("/api/v1/health/ready", get(handlers::readiness_check))
        .route("/api/v1/health/live", get(handlers::liveness_check))
        .route("/api/v1/identity", get(handlers::current_identity))
        .with_state(state)
        .merge(downstream)
        .fallback(handlers::not_found)
        // Innermost first: these run after admission
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(pipeline)
}

/// Turn a handler panic into the standard 500 envelope.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };

    AppError::Internal(format!("Handler panicked: {detail}")).into_response()
}
