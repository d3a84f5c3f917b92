//! # KeyShield Telemetry
//!
//! Structured logging and Prometheus counters for the escrow core.
//!
//! ## Components
//!
//! - **Logging**: `tracing` subscriber with env-filter, pretty output for
//!   development and JSON for containers.
//! - **Metrics**: Prometheus counters for deal transitions, disputes,
//!   deposits and payout retries. Exposition (an HTTP scrape endpoint) is
//!   the runtime's concern; the core only increments.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keyshield_telemetry::{TelemetryConfig, init_telemetry};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     init_telemetry(&config).expect("telemetry init failed");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `KS_SERVICE_NAME` | `keyshield-core` | Service name in log lines |
//! | `KS_LOG_LEVEL` | `info` | Log level filter |
//! | `KS_JSON_LOGS` | `false` | Emit JSON-formatted logs |
//! | `KS_ENVIRONMENT` | `dev` | Deployment environment tag |

mod config;
mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{
    encode_metrics, register_metrics, DEALS_CREATED, DEAL_TRANSITIONS, DEPOSITS_OBSERVED,
    DEPOSITS_REJECTED, DISPUTES_OPENED, DISPUTES_RESOLVED, NOTIFICATIONS_FAILED, PAYOUT_RETRIES,
    REGISTRY,
};
pub use tracing_setup::init_telemetry;

use thiserror::Error;

/// Errors surfaced while bootstrapping telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The tracing subscriber could not be installed.
    #[error("subscriber init failed: {0}")]
    SubscriberInit(String),

    /// A metric could not be registered.
    #[error("metric registration failed: {0}")]
    MetricRegistration(String),
}
