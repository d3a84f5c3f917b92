//! Commission and settlement arithmetic.
//!
//! The formula is authoritative: deals at or below 300 USDT pay the flat
//! 15 USDT; above that, 5% rounded half-up to 2 decimals.
//!
//! ## Settlement split
//!
//! The amount actually withheld from the multisig depends on who bears the
//! commission. When the payer is `buyer` or `seller` the full commission is
//! withheld; when it is `split`, exactly half is withheld and the other half
//! is treated as priced into the deal off-chain. In every case the identity
//!
//! ```text
//! released_to_seller + refunded_to_buyer + fee_withheld = amount
//! ```
//!
//! holds exactly; the three decimals always reconcile against the deposit.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use shared_types::{COMMISSION_FLAT_USDT, COMMISSION_RATE, COMMISSION_RATE_THRESHOLD_USDT};

use super::status::CommissionPayer;

/// How the escrowed amount leaves the multisig at settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementSplit {
    /// Paid out to the seller's wallet.
    pub release_to_seller: Decimal,
    /// Returned to the buyer's wallet.
    pub refund_to_buyer: Decimal,
    /// Retained by the service wallet.
    pub fee_withheld: Decimal,
}

impl SettlementSplit {
    /// The deposit the three parts must reconcile against.
    pub fn total(&self) -> Decimal {
        self.release_to_seller + self.refund_to_buyer + self.fee_withheld
    }
}

/// Commission owed on a deal of the given amount.
pub fn commission_for(amount: Decimal) -> Decimal {
    if amount <= COMMISSION_RATE_THRESHOLD_USDT {
        COMMISSION_FLAT_USDT
    } else {
        (amount * COMMISSION_RATE)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }
}

/// Split applied when the seller is paid (buyer confirmation, auto-release,
/// or a dispute decided for the seller).
pub fn release_split(
    amount: Decimal,
    commission: Decimal,
    payer: CommissionPayer,
) -> SettlementSplit {
    let fee_withheld = match payer {
        CommissionPayer::Buyer | CommissionPayer::Seller => commission,
        CommissionPayer::Split => commission / dec!(2),
    };
    SettlementSplit {
        release_to_seller: amount - fee_withheld,
        refund_to_buyer: Decimal::ZERO,
        fee_withheld,
    }
}

/// Split applied when the buyer is made whole (dispute decided for the
/// buyer, or an admin-forced refund). The service waives its fee.
pub fn refund_split(amount: Decimal) -> SettlementSplit {
    SettlementSplit {
        release_to_seller: Decimal::ZERO,
        refund_to_buyer: amount,
        fee_withheld: Decimal::ZERO,
    }
}
