//! # RAG Chat Gateway
//!
//! Request admission for the RAG chat storage service, built on Axum and
//! Tower. Every request passes through:
//!
//! - **Tracing**: correlation id, inbound/outbound log lines with status and latency
//! - **Rate limiting**: dual token bucket (sustained per minute + burst per
//!   second) keyed by API key prefix or client IP
//! - **Authentication**: shared-secret `X-API-Key` with a public path table
//!
//! before the storage service's own router sees it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Admission (Tracer → Rate Limit → Auth)                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Host routes (/, health) + downstream storage router        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::Router;
//! use ragchat_gateway::{AppState, Config, build_router};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let sessions = Router::new(); // the storage service's routes
//!
//! let app = build_router(AppState::new(config), sessions)?;
//! // serve `app` with connect info so client IPs resolve...
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```bash
//! API_KEY=your-secret-key \
//! RATE_LIMIT_REQUESTS_PER_MINUTE=60 RATE_LIMIT_BURST_CAPACITY=10 cargo run
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use middleware::{AdmissionPipeline, ClientKey, Identity, RateLimiter};
pub use routes::{build_router, build_router_with_pipeline};
pub use state::{AppState, ReadinessCheck};
