//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with defaults
//! matching the storage service's historical behaviour. A `.env` file is
//! read first when present.
//!
//! # Security Configuration
//!
//! - `API_KEY`: Shared secret expected in the `X-API-Key` header (required)
//! - `AUTH_BYPASS_PATHS`: Comma-separated override of the public path table.
//!   A trailing `*` marks a prefix rule (`/actuator*`), anything else is exact.
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_REQUESTS_PER_MINUTE`: Sustained quota per client (default: 60)
//! - `RATE_LIMIT_BURST_CAPACITY`: Requests allowed per second (default: 10)

use std::env;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::{BypassPath, default_bypass_paths};

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8080)
    pub port: u16,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Sustained quota per client key, refilled continuously over a minute
    pub rate_limit_requests_per_minute: u32,

    /// Burst quota per client key, refilled in full every second
    pub rate_limit_burst_capacity: u32,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Shared secret every non-public request must present
    pub api_key: String,

    /// Paths that skip credential checks (still rate limited)
    pub auth_bypass_paths: Vec<BypassPath>,

    // =========================================================================
    // Request Handling
    // =========================================================================
    /// Request body limit, also the size of the tracer's body copy (default: 1MB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable text
    pub log_json: bool,

    /// Port for Prometheus metrics endpoint (default: 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if a value fails to parse, if `API_KEY`
    /// is missing or blank, or if a quota is zero.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 8080)?,

            rate_limit_requests_per_minute: Self::parse_env("RATE_LIMIT_REQUESTS_PER_MINUTE", 60)?,
            rate_limit_burst_capacity: Self::parse_env("RATE_LIMIT_BURST_CAPACITY", 10)?,

            api_key: env::var("API_KEY").unwrap_or_default(),
            auth_bypass_paths: Self::parse_auth_bypass_paths(),

            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?,

            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),
            metrics_port: Self::parse_env("METRICS_PORT", 0)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(AppError::ConfigError(
                "API_KEY must be set to a non-blank value".to_string(),
            ));
        }

        if self.rate_limit_requests_per_minute == 0 {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_REQUESTS_PER_MINUTE must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_burst_capacity == 0 {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_BURST_CAPACITY must be greater than 0".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        self.metrics_enabled()
            .then(|| std::net::SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse auth bypass paths from environment variable.
    ///
    /// Falls back to the built-in public path table when unset or empty.
    fn parse_auth_bypass_paths() -> Vec<BypassPath> {
        env::var("AUTH_BYPASS_PATHS")
            .ok()
            .map(|raw| parse_bypass_list(&raw))
            .filter(|paths| !paths.is_empty())
            .unwrap_or_else(default_bypass_paths)
    }
}

/// Parse a comma-separated bypass list. Entries must start with `/`.
fn parse_bypass_list(raw: &str) -> Vec<BypassPath> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| s.starts_with('/'))
        .map(|s| match s.strip_suffix('*') {
            Some(prefix) => BypassPath::Prefix(prefix.to_string()),
            None => BypassPath::Exact(s.to_string()),
        })
        .collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            rate_limit_requests_per_minute: 60,
            rate_limit_burst_capacity: 10,
            api_key: "change-me".to_string(),
            auth_bypass_paths: default_bypass_paths(),
            max_request_body_size: 1024 * 1024,
            log_level: "info".to_string(),
            log_json: false,
            metrics_port: 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.port, 8080);
        assert_eq!(config.rate_limit_requests_per_minute, 60);
        assert_eq!(config.rate_limit_burst_capacity, 10);
        assert_eq!(config.auth_bypass_paths, default_bypass_paths());
        assert!(!config.metrics_enabled());
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 9000,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "127.0.0.1:9000");
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_blank_api_key() {
        let config = Config {
            api_key: "   ".to_string(),
            ..Config::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("API_KEY"));
    }

    #[test]
    fn test_validate_zero_quotas() {
        let config = Config {
            rate_limit_requests_per_minute: 0,
            ..Config::default()
        };
        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("RATE_LIMIT_REQUESTS_PER_MINUTE")
        );

        let config = Config {
            rate_limit_burst_capacity: 0,
            ..Config::default()
        };
        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("RATE_LIMIT_BURST_CAPACITY")
        );
    }

    #[test]
    fn test_metrics_addr() {
        assert!(Config::default().metrics_addr().is_none());

        let config = Config {
            metrics_port: 9090,
            ..Config::default()
        };
        assert_eq!(config.metrics_addr().unwrap().port(), 9090);
    }

    #[test]
    fn test_parse_bypass_list() {
        let paths = parse_bypass_list(" /status , /docs*, nope, ,/");

        assert_eq!(
            paths,
            vec![
                BypassPath::Exact("/status".to_string()),
                BypassPath::Prefix("/docs".to_string()),
                BypassPath::Exact("/".to_string()),
            ]
        );
    }
}
