use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Response envelope shared by denial responses and host-level errors.
///
/// Serializes as `{"success": bool, "message": string, "timestamp": string}`
/// with an RFC 3339 timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse {
    /// Whether the request succeeded
    pub success: bool,
    /// Human-readable outcome
    pub message: String,
    /// When the response was produced
    pub timestamp: DateTime<Utc>,
}

impl ApiResponse {
    /// Build a failure envelope stamped with the current time.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Service banner returned by `GET /`.
#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
    /// Where the API documentation is served by the storage service
    pub documentation: &'static str,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `UP` or `DOWN`
    pub status: &'static str,
    pub service: &'static str,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

/// Readiness response with per-dependency checks.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: BTreeMap<&'static str, &'static str>,
    pub timestamp: DateTime<Utc>,
}

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Identity attached to the current request, as seen by downstream handlers.
#[derive(Debug, Serialize)]
pub struct IdentityResponse {
    pub principal: &'static str,
    pub role: &'static str,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_error_shape() {
        let json = serde_json::to_value(ApiResponse::error("Invalid API key.")).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Invalid API key.");
        // RFC 3339 text, e.g. 2025-01-15T10:30:00.123Z
        let ts = json["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
        assert_eq!(json.as_object().unwrap().len(), 3);
    }
}
