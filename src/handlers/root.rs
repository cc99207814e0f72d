use axum::Json;
use axum::http::Uri;
use chrono::Utc;

use super::health::{SERVICE_NAME, STATUS_UP};
use crate::error::AppError;
use crate::models::RootResponse;

/// Where the storage service publishes its API documentation.
pub const DOCUMENTATION_PATH: &str = "/swagger-ui.html";

/// Service banner at `GET /`.
pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        status: STATUS_UP,
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
        documentation: DOCUMENTATION_PATH,
    })
}

/// Fallback for paths no router claims.
pub async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("No route for {}", uri.path()))
}
