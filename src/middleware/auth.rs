//! API key authentication middleware.
//!
//! Every request that is not on the public path table must carry the shared
//! secret in `X-API-Key`. On success an [`Identity`] is attached to the
//! request extensions for downstream handlers; on failure the chain stops with
//! a `401` JSON envelope:
//!
//! - header absent or blank: `"Missing API key. Provide X-API-Key header."`
//! - header differs from the secret: `"Invalid API key."`
//!
//! Both failures share the status code and code path; only the message differs.
//!
//! # Public Paths
//!
//! Matching is against `request.uri().path()` (query string excluded) and is
//! case-sensitive. Prefix rules are plain `starts_with`, so `/api/v1/health`
//! also admits `/api/v1/healthz`. See [`default_bypass_paths`].
//!
//! Public paths skip only the credential check. They are still rate limited
//! because the rate limiter runs first.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Json;
use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use subtle::ConstantTimeEq;
use tower::{Layer, Service};
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::metrics;
use crate::models::ApiResponse;

/// Header name for API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// 401 message when no credential was supplied.
pub const MISSING_API_KEY_MESSAGE: &str = "Missing API key. Provide X-API-Key header.";

/// 401 message when the credential does not match.
pub const INVALID_API_KEY_MESSAGE: &str = "Invalid API key.";

/// Principal assigned to every authenticated caller.
pub const API_CLIENT_PRINCIPAL: &str = "api-client";

/// A path rule exempt from credential checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BypassPath {
    /// Matches only this exact path.
    Exact(String),
    /// Matches any path starting with this text.
    Prefix(String),
}

impl BypassPath {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            BypassPath::Exact(p) => path == p,
            BypassPath::Prefix(p) => path.starts_with(p.as_str()),
        }
    }
}

/// Built-in public path table.
///
/// This list is compatibility-sensitive: monitoring, documentation and the
/// service banner are reachable without a key.
const DEFAULT_BYPASS_PATHS: [(&str, bool); 9] = [
    ("/", false),
    ("/api/v1/health", true),
    ("/actuator", true),
    ("/swagger-ui", true),
    ("/swagger-ui.html", false),
    ("/swagger-resources", true),
    ("/api-docs", true),
    ("/v3/api-docs", true),
    ("/webjars", true),
];

/// The built-in public path table as rules.
pub fn default_bypass_paths() -> Vec<BypassPath> {
    DEFAULT_BYPASS_PATHS
        .iter()
        .map(|&(path, prefix)| {
            if prefix {
                BypassPath::Prefix(path.to_string())
            } else {
                BypassPath::Exact(path.to_string())
            }
        })
        .collect()
}

/// Whether `path` matches any rule in `rules`.
pub fn is_bypass_path(rules: &[BypassPath], path: &str) -> bool {
    rules.iter().any(|rule| rule.matches(path))
}

// =============================================================================
// Identity
// =============================================================================

/// Capability marker granted to authenticated callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    ApiClient,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::ApiClient => "ROLE_API_CLIENT",
        }
    }
}

/// Who the caller is, as established by the authenticator.
///
/// Lives in the request extensions for the rest of the request. Handlers can
/// take it as an extractor; the extraction fails with 401 on public paths,
/// where no identity is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub principal: &'static str,
    pub role: Role,
}

impl Identity {
    /// The fixed identity for holders of the shared secret.
    pub const fn api_client() -> Self {
        Self {
            principal: API_CLIENT_PRINCIPAL,
            role: Role::ApiClient,
        }
    }
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .copied()
            .ok_or_else(|| AppError::Unauthenticated("Authentication required.".to_string()))
    }
}

// =============================================================================
// Tower Layer
// =============================================================================

/// API key authentication layer.
#[derive(Clone)]
pub struct ApiKeyAuth {
    /// Shared secret
    expected_key: Arc<String>,
    /// Paths that bypass authentication
    bypass_paths: Arc<Vec<BypassPath>>,
}

impl ApiKeyAuth {
    /// Create a new API key auth layer.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Shared secret callers must present
    /// * `bypass_paths` - Rules for paths that skip the check
    pub fn new(api_key: String, bypass_paths: Vec<BypassPath>) -> Self {
        Self {
            expected_key: Arc::new(api_key),
            bypass_paths: Arc::new(bypass_paths),
        }
    }

    /// Create with the built-in public path table.
    pub fn with_defaults(api_key: String) -> Self {
        Self::new(api_key, default_bypass_paths())
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.api_key.clone(), config.auth_bypass_paths.clone())
    }

    pub fn bypass_paths(&self) -> &[BypassPath] {
        &self.bypass_paths
    }
}

impl<S> Layer<S> for ApiKeyAuth {
    type Service = ApiKeyAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ApiKeyAuthService {
            inner,
            expected_key: self.expected_key.clone(),
            bypass_paths: self.bypass_paths.clone(),
        }
    }
}

/// API key authentication service wrapper.
#[derive(Clone)]
pub struct ApiKeyAuthService<S> {
    inner: S,
    expected_key: Arc<String>,
    bypass_paths: Arc<Vec<BypassPath>>,
}

/// Outcome of checking a request's credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Public,
    Authenticated,
    Missing,
    Invalid,
}

impl<S> ApiKeyAuthService<S> {
    fn verdict<B>(&self, req: &Request<B>) -> Verdict {
        if is_bypass_path(&self.bypass_paths, req.uri().path()) {
            return Verdict::Public;
        }

        match extract_api_key(req) {
            None => Verdict::Missing,
            Some(provided) if keys_match(provided, &self.expected_key) => Verdict::Authenticated,
            Some(_) => Verdict::Invalid,
        }
    }
}

impl<S> Service<Request<Body>> for ApiKeyAuthService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let message = match self.verdict(&req) {
            Verdict::Public => {
                trace!(path = %req.uri().path(), "Public path, skipping API key check");
                None
            }
            Verdict::Authenticated => {
                req.extensions_mut().insert(Identity::api_client());
                debug!(path = %req.uri().path(), "API key authenticated");
                None
            }
            Verdict::Missing => {
                warn!(path = %req.uri().path(), "Missing API key");
                metrics::record_auth_failure("missing");
                Some(MISSING_API_KEY_MESSAGE)
            }
            Verdict::Invalid => {
                warn!(path = %req.uri().path(), "Invalid API key");
                metrics::record_auth_failure("invalid");
                Some(INVALID_API_KEY_MESSAGE)
            }
        };

        match message {
            Some(message) => Box::pin(async move { Ok(unauthorized_response(message)) }),
            None => {
                let clone = self.inner.clone();
                let mut inner = std::mem::replace(&mut self.inner, clone);
                Box::pin(async move { inner.call(req).await })
            }
        }
    }
}

/// Raw `X-API-Key` bytes, or `None` when the header is absent or blank.
///
/// Non-UTF-8 values are returned as-is; they can never equal the configured
/// secret and so end up as "invalid" rather than "missing".
fn extract_api_key<B>(req: &Request<B>) -> Option<&[u8]> {
    let value = req.headers().get(API_KEY_HEADER)?.as_bytes();
    if value.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    Some(value)
}

/// Exact match between the provided and expected key.
///
/// Content comparison is constant-time; a length mismatch returns early.
fn keys_match(provided: &[u8], expected: &str) -> bool {
    provided.ct_eq(expected.as_bytes()).into()
}

/// Build an unauthorized (401) response.
fn unauthorized_response(message: &str) -> Response<Body> {
    (StatusCode::UNAUTHORIZED, Json(ApiResponse::error(message))).into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn service() -> ApiKeyAuthService<()> {
        ApiKeyAuthService {
            inner: (),
            expected_key: Arc::new("s3cr3t-key".to_string()),
            bypass_paths: Arc::new(default_bypass_paths()),
        }
    }

    fn request(path: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(path);
        if let Some(key) = key {
            builder = builder.header("x-api-key", key);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_default_table_rules() {
        let rules = default_bypass_paths();

        for public in [
            "/",
            "/api/v1/health",
            "/api/v1/health/ready",
            "/api/v1/healthz",
            "/actuator/info",
            "/swagger-ui/index.html",
            "/swagger-ui.html",
            "/swagger-resources/configuration",
            "/api-docs",
            "/v3/api-docs/swagger-config",
            "/webjars/lib.js",
        ] {
            assert!(is_bypass_path(&rules, public), "{public} should be public");
        }

        for protected in [
            "/api/v1/sessions",
            "/api/v1",
            "/index.html",
            "//",
            "/API/V1/HEALTH",
            "/swagger",
        ] {
            assert!(!is_bypass_path(&rules, protected), "{protected} should be protected");
        }
    }

    #[test]
    fn test_root_is_exact_only() {
        assert!(BypassPath::Exact("/".to_string()).matches("/"));
        assert!(!BypassPath::Exact("/".to_string()).matches("/anything"));
    }

    #[test]
    fn test_verdict_missing() {
        let svc = service();
        assert_eq!(svc.verdict(&request("/api/v1/sessions", None)), Verdict::Missing);
        assert_eq!(svc.verdict(&request("/api/v1/sessions", Some("  "))), Verdict::Missing);
        assert_eq!(svc.verdict(&request("/api/v1/sessions", Some(""))), Verdict::Missing);
    }

    #[test]
    fn test_verdict_invalid_single_char_difference() {
        let svc = service();
        assert_eq!(
            svc.verdict(&request("/api/v1/sessions", Some("s3cr3t-kez"))),
            Verdict::Invalid
        );
        assert_eq!(
            svc.verdict(&request("/api/v1/sessions", Some("s3cr3t-key "))),
            Verdict::Invalid
        );
    }

    #[test]
    fn test_verdict_authenticated() {
        let svc = service();
        assert_eq!(
            svc.verdict(&request("/api/v1/sessions", Some("s3cr3t-key"))),
            Verdict::Authenticated
        );
    }

    #[test]
    fn test_verdict_public_ignores_credentials() {
        let svc = service();
        assert_eq!(svc.verdict(&request("/api/v1/health", None)), Verdict::Public);
        assert_eq!(
            svc.verdict(&request("/api/v1/health", Some("wrong"))),
            Verdict::Public
        );
        // query string is not part of the path
        assert_eq!(svc.verdict(&request("/?x=1", None)), Verdict::Public);
    }

    #[test]
    fn test_keys_match() {
        assert!(keys_match(b"secret123", "secret123"));
        assert!(!keys_match(b"secret124", "secret123"));
        assert!(!keys_match(b"short", "much-longer-string"));
    }

    #[test]
    fn test_identity_fixed_values() {
        let identity = Identity::api_client();
        assert_eq!(identity.principal, "api-client");
        assert_eq!(identity.role.as_str(), "ROLE_API_CLIENT");
    }

    #[tokio::test]
    async fn test_identity_extractor() {
        let (mut parts, _) = request("/x", None).into_parts();
        assert!(Identity::from_request_parts(&mut parts, &()).await.is_err());

        parts.extensions.insert(Identity::api_client());
        let identity = Identity::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(identity, Identity::api_client());
    }
}
