//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging and metrics.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name stamped on every log line.
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error).
    pub log_level: String,

    /// Whether to emit JSON formatted logs (containers) instead of pretty
    /// output (development).
    pub json_logs: bool,

    /// Deployment environment tag (dev, staging, production).
    pub environment: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "keyshield-core".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            environment: "dev".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `KS_SERVICE_NAME`: Service name (default: keyshield-core)
    /// - `KS_LOG_LEVEL`: Log level filter (default: info)
    /// - `KS_JSON_LOGS`: `true`/`1` for JSON logs (default: false)
    /// - `KS_ENVIRONMENT`: Deployment environment (default: dev)
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            service_name: env::var("KS_SERVICE_NAME").unwrap_or(default.service_name),
            log_level: env::var("KS_LOG_LEVEL").unwrap_or(default.log_level),
            json_logs: env::var("KS_JSON_LOGS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(default.json_logs),
            environment: env::var("KS_ENVIRONMENT").unwrap_or(default.environment),
        }
    }
}
