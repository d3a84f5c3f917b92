//! Partner platform aggregate and its denormalized stats.
//!
//! The stats block exists for O(1) dashboard reads; the partner ledger is
//! the only writer outside of admin CRUD.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared_types::PlatformCode;

/// Denormalized accounting snapshot for one platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformStats {
    /// Users sourced by this platform.
    pub users: u64,
    /// Settled deals (completed or resolved) counted into the totals.
    pub deals: u64,
    /// Σ amount over settled deals.
    pub total_volume: Decimal,
    /// Σ commission over settled deals.
    pub total_commission: Decimal,
    /// Σ operational TRX spent.
    pub total_trx_spent: Decimal,
    /// Σ of per-deal TRX cost priced at each deal's completion-time rate.
    pub total_trx_spent_usdt: Decimal,
    /// Commission revenue minus operational cost, in USDT.
    pub net_profit: Decimal,
    /// The partner's share of net profit.
    pub payout: Decimal,
    /// Residual accruing to the service wallet.
    pub platform_pure_profit: Decimal,
}

/// An affiliate channel with its own commission share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    /// Short immutable code users are tagged with.
    pub code: PlatformCode,
    /// Display name shown in the partner portal.
    pub display_name: String,
    /// Portal login credential, hashed by the portal before it gets here.
    pub password_hash: String,
    /// Share of net profit paid to the partner, percent 0–100.
    pub commission_percent: Decimal,
    /// Inactive platforms keep their history but source no new users.
    pub active: bool,
    /// Denormalized accounting, maintained by the partner ledger.
    pub stats: PlatformStats,
}

impl Platform {
    /// A fresh platform with zeroed stats.
    pub fn new(
        code: PlatformCode,
        display_name: impl Into<String>,
        password_hash: impl Into<String>,
        commission_percent: Decimal,
    ) -> Self {
        Self {
            code,
            display_name: display_name.into(),
            password_hash: password_hash.into(),
            commission_percent,
            active: true,
            stats: PlatformStats::default(),
        }
    }
}
