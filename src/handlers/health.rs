//! Health, readiness, and liveness endpoints.
//!
//! # Endpoints
//!
//! - `GET /api/v1/health` - Basic health status
//! - `GET /api/v1/health/ready` - Readiness probe over registered checks
//! - `GET /api/v1/health/live` - Liveness probe
//!
//! All three sit under the public `/api/v1/health` prefix, so they need no
//! API key, but they are still rate limited like any other request.
//!
//! # Health vs Readiness
//!
//! - **Health**: Always 200 while the process can answer
//! - **Readiness**: 503 if any registered check reports down

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::{instrument, warn};

use crate::models::{HealthResponse, LivenessResponse, ReadinessResponse};
use crate::state::AppState;

pub const STATUS_UP: &str = "UP";
pub const STATUS_DOWN: &str = "DOWN";

/// Human-readable service name reported by the health endpoints.
pub const SERVICE_NAME: &str = "RAG Chat Storage Microservice";

/// Basic health check.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "UP",
///   "service": "RAG Chat Storage Microservice",
///   "uptime_seconds": 3600,
///   "timestamp": "2025-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: STATUS_UP,
        service: SERVICE_NAME,
        uptime_seconds: state.uptime_seconds(),
        timestamp: Utc::now(),
    })
}

/// Readiness check for orchestrator probes.
///
/// Returns 200 when every registered check passes, 503 otherwise. The body
/// lists each check as `UP` or `DOWN` either way.
#[instrument(skip(state))]
pub async fn readiness_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let mut checks = BTreeMap::new();
    let mut ready = true;

    for (name, up) in state.readiness() {
        if !up {
            warn!(check = name, "Readiness check failed");
            ready = false;
        }
        checks.insert(name, if up { STATUS_UP } else { STATUS_DOWN });
    }

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            status: if ready { STATUS_UP } else { STATUS_DOWN },
            checks,
            timestamp: Utc::now(),
        }),
    )
}

/// Liveness check.
pub async fn liveness_check() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: STATUS_UP,
        timestamp: Utc::now(),
    })
}
