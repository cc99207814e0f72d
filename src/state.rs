//! Shared application state for Axum handlers.
//!
//! The admission pipeline owns its own registry; handlers only need the
//! configuration, process start time, and the readiness checks registered by
//! the downstream service (e.g. its database connection).

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;

/// A dependency the readiness probe asks before reporting `UP`.
///
/// Implemented for any `Fn() -> bool` closure.
pub trait ReadinessCheck: Send + Sync {
    fn is_ready(&self) -> bool;
}

impl<F> ReadinessCheck for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_ready(&self) -> bool {
        self()
    }
}

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Timestamp when the application started
    pub started_at: Instant,
    readiness: Vec<(&'static str, Arc<dyn ReadinessCheck>)>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            started_at: Instant::now(),
            readiness: Vec::new(),
        }
    }

    /// Register a named readiness check.
    pub fn with_readiness_check(mut self, name: &'static str, check: impl ReadinessCheck + 'static) -> Self {
        self.readiness.push((name, Arc::new(check)));
        self
    }

    /// Run every readiness check, in registration order.
    pub fn readiness(&self) -> impl Iterator<Item = (&'static str, bool)> + '_ {
        self.readiness
            .iter()
            .map(|(name, check)| (*name, check.is_ready()))
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("started_at", &self.started_at)
            .field(
                "readiness",
                &self.readiness.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            )
            .finish()
    }
}
