//! Engine configuration.
//!
//! Everything the business side may want to tune lives here: amount floors,
//! deadline bounds, on-chain cost conventions and the payout retry policy.
//! Constructed once at process init and shared by reference.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use shared_types::{WalletAddress, HOUR_MS, MINUTE_MS};
use std::time::Duration;

/// Policy for the background payout retry worker.
#[derive(Debug, Clone)]
pub struct PayoutRetryPolicy {
    /// Maximum attempts before the deal is left for admin intervention.
    pub max_attempts: u32,
    /// Backoff before the first retry; doubles on every subsequent attempt.
    pub initial_backoff: Duration,
    /// Upper bound for a single backoff step.
    pub max_backoff: Duration,
    /// Retries stop once this much time passed since the first failure.
    pub horizon_ms: u64,
}

impl Default for PayoutRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(6 * 60 * 60),
            horizon_ms: 24 * HOUR_MS,
        }
    }
}

/// Tunables of the deal lifecycle engine and its monitors.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum escrow amount in USDT.
    pub min_amount_usdt: Decimal,

    /// Deadline bounds in hours, inclusive.
    pub min_deadline_hours: u64,
    /// See `min_deadline_hours`.
    pub max_deadline_hours: u64,

    /// How long after the deal deadline a submitted work is auto-released
    /// when the buyer stays silent (the buyer default-acceptance window).
    pub auto_release_window_ms: u64,

    /// Funding deals get one warning notification this long before expiry.
    pub deadline_warning_ms: u64,

    /// TRX spent to activate a fresh multisig, by convention.
    pub multisig_activation_trx: Decimal,

    /// TRX funded into the multisig when the FeeSaver path is unavailable.
    pub fallback_energy_trx: Decimal,

    /// Bounded timeout for every blockchain call made inside a transition.
    pub blockchain_timeout: Duration,

    /// Sweep period of the deadline monitor.
    pub sweep_period: Duration,

    /// TTL for advisory input-flow sessions.
    pub session_ttl_ms: u64,

    /// Service-held key of the 2-of-3 multisig.
    pub service_wallet: WalletAddress,

    /// Payout retry policy.
    pub payout_retry: PayoutRetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_amount_usdt: dec!(50),
            min_deadline_hours: 24,
            max_deadline_hours: 720,
            auto_release_window_ms: 72 * HOUR_MS,
            deadline_warning_ms: HOUR_MS,
            multisig_activation_trx: dec!(5),
            fallback_energy_trx: dec!(30),
            blockchain_timeout: Duration::from_secs(30),
            sweep_period: Duration::from_secs(60),
            session_ttl_ms: 30 * MINUTE_MS,
            service_wallet: WalletAddress::new("TServiceEscrowKey000000000000000000"),
            payout_retry: PayoutRetryPolicy::default(),
        }
    }
}
