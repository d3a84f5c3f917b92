//! # Money
//!
//! Monetary constants and the asset taxonomy. Amounts are
//! [`rust_decimal::Decimal`] everywhere; USDT amounts carry at most 6
//! fractional digits, commission is rounded half-up to 2.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Flat commission floor in USDT.
pub const COMMISSION_FLAT_USDT: Decimal = dec!(15);

/// Commission rate applied above the threshold.
pub const COMMISSION_RATE: Decimal = dec!(0.05);

/// Deals at or below this amount pay the flat commission.
pub const COMMISSION_RATE_THRESHOLD_USDT: Decimal = dec!(300);

/// Escrowed asset. The product currently brokers TRC-20 USDT and native TRX.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Asset {
    Usdt,
    Trx,
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usdt => f.write_str("USDT"),
            Self::Trx => f.write_str("TRX"),
        }
    }
}
