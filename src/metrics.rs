//! Prometheus metrics for the admission pipeline.
//!
//! Export is opt-in (`METRICS_PORT > 0`). The recording functions are safe to
//! call when no exporter is installed; the `metrics` facade drops the samples.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gateway_requests_total` - Completed requests (labels: method, status)
//! - `gateway_rate_limited_total` - Requests refused by the rate limiter (label: limit)
//! - `gateway_auth_failures_total` - Requests refused by the authenticator (label: reason)
//!
//! ## Histograms
//! - `gateway_request_duration_seconds` - End-to-end latency seen by the tracer
//!
//! ## Gauges
//! - `gateway_rate_limit_buckets` - Live client buckets in the registry. Buckets
//!   are never evicted, so this only grows; watch it for key-cardinality blowups.

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "gateway_requests_total";
    pub const RATE_LIMITED_TOTAL: &str = "gateway_rate_limited_total";
    pub const AUTH_FAILURES_TOTAL: &str = "gateway_auth_failures_total";
    pub const REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
    pub const RATE_LIMIT_BUCKETS: &str = "gateway_rate_limit_buckets";
}

/// Initialize the Prometheus metrics exporter on `metrics_addr`.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(names::REQUESTS_TOTAL, "Total number of completed HTTP requests");
    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Total number of requests refused with 429"
    );
    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Total number of requests refused with 401"
    );
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_gauge!(
        names::RATE_LIMIT_BUCKETS,
        "Number of client keys tracked by the rate limiter"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record a finished request as observed by the tracer.
pub fn record_request(method: &str, status: u16, duration_secs: f64) {
    counter!(names::REQUESTS_TOTAL, "method" => method.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!(names::REQUEST_DURATION_SECONDS, "method" => method.to_string())
        .record(duration_secs);
}

/// Record a rate limit denial; `limit` names the exhausted bandwidth.
pub fn record_rate_limited(limit: &'static str) {
    counter!(names::RATE_LIMITED_TOTAL, "limit" => limit).increment(1);
}

/// Record an authentication failure (`missing` or `invalid`).
pub fn record_auth_failure(reason: &'static str) {
    counter!(names::AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
}

/// Update the live bucket gauge.
pub fn set_bucket_count(count: usize) {
    gauge!(names::RATE_LIMIT_BUCKETS).set(count as f64);
}
