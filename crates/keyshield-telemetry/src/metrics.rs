//! Prometheus metrics for the deal lifecycle.
//!
//! Naming convention: `ks_<component>_<metric>_<unit>`.

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry.
    pub static ref REGISTRY: Registry = Registry::new();

    /// Total deals created.
    pub static ref DEALS_CREATED: Counter = Counter::new(
        "ks_engine_deals_created_total",
        "Total number of deals created"
    ).expect("metric creation failed");

    /// Successful state transitions, labelled by source and target status.
    pub static ref DEAL_TRANSITIONS: CounterVec = CounterVec::new(
        Opts::new("ks_engine_transitions_total", "Successful deal transitions"),
        &["from", "to"]
    ).expect("metric creation failed");

    /// Deposits observed by the deposit monitor.
    pub static ref DEPOSITS_OBSERVED: Counter = Counter::new(
        "ks_deposit_monitor_deposits_total",
        "Deposits correlated to a waiting deal"
    ).expect("metric creation failed");

    /// Deposits rejected (underpay, duplicate, unknown address).
    pub static ref DEPOSITS_REJECTED: CounterVec = CounterVec::new(
        Opts::new("ks_deposit_monitor_rejected_total", "Deposits not applied"),
        &["reason"]
    ).expect("metric creation failed");

    /// Disputes opened.
    pub static ref DISPUTES_OPENED: Counter = Counter::new(
        "ks_disputes_opened_total",
        "Total disputes opened"
    ).expect("metric creation failed");

    /// Disputes resolved, labelled by decision.
    pub static ref DISPUTES_RESOLVED: CounterVec = CounterVec::new(
        Opts::new("ks_disputes_resolved_total", "Disputes resolved"),
        &["decision"]
    ).expect("metric creation failed");

    /// Payout retry attempts by the background worker.
    pub static ref PAYOUT_RETRIES: CounterVec = CounterVec::new(
        Opts::new("ks_payout_retries_total", "Payout retry attempts"),
        &["outcome"]
    ).expect("metric creation failed");

    /// Notifications that failed to dispatch (fire-and-forget, logged only).
    pub static ref NOTIFICATIONS_FAILED: Counter = Counter::new(
        "ks_notifications_failed_total",
        "Notification dispatches that returned an error"
    ).expect("metric creation failed");
}

/// Register every metric family with the global registry.
///
/// Safe to call once; a duplicate registration is reported as an error.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(DEALS_CREATED.clone()),
        Box::new(DEAL_TRANSITIONS.clone()),
        Box::new(DEPOSITS_OBSERVED.clone()),
        Box::new(DEPOSITS_REJECTED.clone()),
        Box::new(DISPUTES_OPENED.clone()),
        Box::new(DISPUTES_RESOLVED.clone()),
        Box::new(PAYOUT_RETRIES.clone()),
        Box::new(NOTIFICATIONS_FAILED.clone()),
    ];

    for collector in collectors {
        REGISTRY
            .register(collector)
            .map_err(|e| TelemetryError::MetricRegistration(e.to_string()))?;
    }

    Ok(())
}

/// Encode the registry in Prometheus text exposition format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    encoder
        .encode(&families, &mut buf)
        .map_err(|e| TelemetryError::MetricRegistration(e.to_string()))?;
    String::from_utf8(buf).map_err(|e| TelemetryError::MetricRegistration(e.to_string()))
}
