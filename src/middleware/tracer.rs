//! Request tracing middleware.
//!
//! Outermost stage of the admission pipeline. For every request it:
//!
//! 1. Generates a short correlation id (8 hex chars of a v4 UUID; collisions
//!    are tolerable, it only groups log lines)
//! 2. Logs an `inbound request` line with method, path and client address
//! 3. Runs the rest of the chain inside a `request` span
//! 4. Logs an `outbound response` line with the final status and duration
//! 5. Echoes the id back in `X-Request-Id`
//!
//! The outbound line is written by a drop guard, so it is emitted exactly once
//! whether the inner stages return normally, short-circuit with a denial,
//! fail (logged as 500) or the request future is dropped mid-flight (logged
//! as 499, the conventional "client closed request").
//!
//! # Body Caching
//!
//! The tracer never reads the request body itself. Non-empty bodies are
//! wrapped so that whatever the downstream handler consumes is also copied,
//! up to the configured bound, into a [`CachedBody`] extension. A request
//! denied by the rate limiter or the authenticator therefore leaves its body
//! unread, and a body stream that fails surfaces its error to the reader
//! instead of being answered by the tracer.

use std::borrow::Cow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes, HttpBody};
use axum::http::header::HeaderValue;
use axum::http::{Method, Request, Response, StatusCode};
use futures_util::StreamExt;
use tower::{Layer, Service};
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use super::ip::resolve_client_addr;
use crate::config::Config;
use crate::metrics;

/// Header carrying the correlation id on responses.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Length of the generated correlation id.
pub const CORRELATION_ID_LEN: usize = 8;

/// Status logged when the request future is dropped before completion.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Fallback header value if the id cannot be encoded.
static UNKNOWN_REQUEST_ID: HeaderValue = HeaderValue::from_static("unknown");

/// Copy of the request body as it has been read so far.
///
/// Filled while the downstream handler consumes the body; empty if nothing
/// has read it yet. Bytes past the bound are passed through but not kept.
#[derive(Debug, Clone)]
pub struct CachedBody {
    buf: Arc<Mutex<Vec<u8>>>,
    limit: usize,
}

impl CachedBody {
    fn new(limit: usize) -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::new())),
            limit,
        }
    }

    fn append(&self, chunk: &[u8]) {
        let mut buf = self.lock();
        let room = self.limit.saturating_sub(buf.len());
        if let Some(kept) = chunk.get(..chunk.len().min(room)) {
            buf.extend_from_slice(kept);
        }
    }

    /// The bytes captured so far.
    pub fn bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        // A panic while copying leaves a prefix, which is still a valid capture
        self.buf.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-request trace record, owned by the tracer for one request.
#[derive(Debug)]
pub struct RequestContext {
    pub correlation_id: String,
    pub method: Method,
    pub path: String,
    pub client_addr: Cow<'static, str>,
    pub started_at: Instant,
    /// Final status, once known
    pub status: Option<StatusCode>,
}

impl RequestContext {
    fn from_request<B>(req: &Request<B>, correlation_id: String) -> Self {
        Self {
            correlation_id,
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            client_addr: resolve_client_addr(req).to_cow(),
            started_at: Instant::now(),
            status: None,
        }
    }

    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Emits the outbound record when dropped.
struct OutboundGuard {
    ctx: RequestContext,
}

impl Drop for OutboundGuard {
    fn drop(&mut self) {
        let status = self
            .ctx
            .status
            .map_or(CLIENT_CLOSED_REQUEST, |s| s.as_u16());
        let duration = self.ctx.duration();

        info!(
            request_id = %self.ctx.correlation_id,
            method = %self.ctx.method,
            path = %self.ctx.path,
            status,
            duration_ms = duration.as_millis() as u64,
            "outbound response"
        );
        metrics::record_request(self.ctx.method.as_str(), status, duration.as_secs_f64());
    }
}

/// Generate a short, collision-tolerant correlation id.
pub fn generate_correlation_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(CORRELATION_ID_LEN);
    id
}

/// Request tracing layer for the Tower middleware stack.
#[derive(Clone, Debug)]
pub struct RequestTracerLayer {
    max_body_size: usize,
}

impl RequestTracerLayer {
    /// Create a tracer that caches up to `max_body_size` bytes of each body.
    pub fn new(max_body_size: usize) -> Self {
        Self { max_body_size }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_request_body_size)
    }
}

impl<S> Layer<S> for RequestTracerLayer {
    type Service = RequestTracerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestTracerService {
            inner,
            max_body_size: self.max_body_size,
        }
    }
}

/// Request tracing service wrapper.
#[derive(Clone)]
pub struct RequestTracerService<S> {
    inner: S,
    max_body_size: usize,
}

impl<S> Service<Request<Body>> for RequestTracerService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let ctx = RequestContext::from_request(&req, generate_correlation_id());

        info!(
            request_id = %ctx.correlation_id,
            method = %ctx.method,
            path = %ctx.path,
            client = %ctx.client_addr,
            "inbound request"
        );

        let span = info_span!("request", request_id = %ctx.correlation_id);
        let request_id = HeaderValue::from_str(&ctx.correlation_id)
            .unwrap_or_else(|_| UNKNOWN_REQUEST_ID.clone());
        // Created before the future so an unpolled, dropped future still logs
        let guard = OutboundGuard { ctx };
        let req = cache_body(req, self.max_body_size);

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(
            async move {
                // Take the whole guard, not just the field written below
                let mut guard = guard;
                let result = inner.call(req).await;

                guard.ctx.status = Some(match &result {
                    Ok(response) => response.status(),
                    Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
                });

                result.map(|mut response| {
                    response.headers_mut().insert(REQUEST_ID_HEADER, request_id);
                    response
                })
            }
            .instrument(span),
        )
    }
}

/// Wrap a non-empty body so every chunk read downstream is also cached.
fn cache_body(req: Request<Body>, max_body_size: usize) -> Request<Body> {
    if req.body().is_end_stream() {
        return req;
    }

    let (mut parts, body) = req.into_parts();
    let cache = CachedBody::new(max_body_size);
    parts.extensions.insert(cache.clone());

    let stream = body.into_data_stream().map(move |chunk| {
        if let Ok(bytes) = &chunk {
            cache.append(bytes);
        }
        chunk
    });

    Request::from_parts(parts, Body::from_stream(stream))
}
