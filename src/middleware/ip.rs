//! Client address resolution shared by the tracer and the rate limiter.
//!
//! # Resolution Order
//!
//! 1. First comma-separated value of `X-Forwarded-For` (when the header is
//!    present and not blank)
//! 2. The transport-level peer address from axum's [`ConnectInfo`]
//! 3. [`UNKNOWN_IP`] when neither is available (e.g. in-process tests)
//!
//! # Security Warning: IP Spoofing Risk
//!
//! `X-Forwarded-For` is client controlled. Deploy behind a reverse proxy that
//! overwrites the header, otherwise callers can rotate their quota key at will.

use std::borrow::Cow;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;

/// Header carrying the proxy chain, client first.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Fallback address text when no client address can be determined.
pub const UNKNOWN_IP: &str = "unknown";

/// Where a client address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAddr<'a> {
    /// First entry of `X-Forwarded-For`, trimmed.
    Forwarded(&'a str),
    /// Peer address of the TCP connection.
    Remote(IpAddr),
    /// Nothing available.
    Unknown,
}

impl fmt::Display for ClientAddr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientAddr::Forwarded(addr) => f.write_str(addr),
            ClientAddr::Remote(ip) => write!(f, "{ip}"),
            ClientAddr::Unknown => f.write_str(UNKNOWN_IP),
        }
    }
}

impl ClientAddr<'_> {
    /// Owned text form; borrows the static fallback without allocating.
    pub fn to_cow(&self) -> Cow<'static, str> {
        match self {
            ClientAddr::Unknown => Cow::Borrowed(UNKNOWN_IP),
            other => Cow::Owned(other.to_string()),
        }
    }
}

/// First value of `X-Forwarded-For`, if the header is present and not blank.
///
/// A header such as `", 10.0.0.1"` yields an empty first entry; it is returned
/// as-is rather than skipped so the proxy's intent is not reinterpreted.
#[inline]
pub fn forwarded_for<B>(req: &Request<B>) -> Option<&str> {
    let value = req.headers().get(FORWARDED_FOR_HEADER)?.to_str().ok()?;
    if value.trim().is_empty() {
        return None;
    }
    value.split(',').next().map(str::trim)
}

/// Peer IP recorded by `into_make_service_with_connect_info`.
#[inline]
pub fn remote_addr<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Resolve the client address for a request.
#[inline]
pub fn resolve_client_addr<B>(req: &Request<B>) -> ClientAddr<'_> {
    if let Some(addr) = forwarded_for(req) {
        return ClientAddr::Forwarded(addr);
    }
    match remote_addr(req) {
        Some(ip) => ClientAddr::Remote(ip),
        None => ClientAddr::Unknown,
    }
}
