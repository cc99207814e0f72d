//! Fuzz testing for admission-key derivation and bypass matching.
//!
//! Feeds arbitrary `X-API-Key` / `X-Forwarded-For` headers and paths through
//! the same functions the middleware uses and checks they never panic and
//! always produce a well-formed client key.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_admission -- -max_total_time=60
//! ```

#![no_main]

use arbitrary::Arbitrary;
use axum::body::Body;
use axum::http::Request;
use libfuzzer_sys::fuzz_target;
use ragchat_gateway::middleware::auth::{default_bypass_paths, is_bypass_path};
use ragchat_gateway::middleware::rate_limit::API_KEY_PREFIX_LEN;
use ragchat_gateway::ClientKey;

#[derive(Debug, Arbitrary)]
struct Input {
    api_key: Option<Vec<u8>>,
    forwarded_for: Option<Vec<u8>>,
    path: String,
}

fuzz_target!(|input: Input| {
    let rules = default_bypass_paths();
    let _ = is_bypass_path(&rules, &input.path);

    let mut builder = Request::builder();
    if let Some(key) = &input.api_key {
        builder = builder.header("x-api-key", key.as_slice());
    }
    if let Some(xff) = &input.forwarded_for {
        builder = builder.header("x-forwarded-for", xff.as_slice());
    }
    // Invalid header bytes are rejected by the http crate before any middleware runs
    let Ok(req) = builder.body(Body::empty()) else {
        return;
    };

    let key = ClientKey::from_request(&req);
    let text = key.as_str();
    assert!(text.starts_with("apikey:") || text.starts_with("ip:"));

    if let Some(prefix) = text.strip_prefix("apikey:") {
        assert!(!prefix.is_empty());
        assert!(prefix.chars().count() <= API_KEY_PREFIX_LEN);
    }
});
