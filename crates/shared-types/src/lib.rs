//! # Shared Types Crate
//!
//! Cross-cutting primitives shared by every KeyShield crate.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: identifiers, money and time types are
//!   defined once, here, and re-used by the core and the runtime.
//! - **No floats for money**: every amount is a [`rust_decimal::Decimal`]
//!   with 6 fractional digits; IEEE-754 never touches persistence.
//! - **Injected time**: all components read the clock through the [`Clock`]
//!   trait so deadlines are deterministic under test.

pub mod ids;
pub mod money;
pub mod time;

pub use ids::{DealId, PlatformCode, TelegramId, TxHash, WalletAddress};
pub use money::{Asset, COMMISSION_FLAT_USDT, COMMISSION_RATE, COMMISSION_RATE_THRESHOLD_USDT};
pub use time::{Clock, ManualClock, SystemClock, TimestampMs, HOUR_MS, MINUTE_MS, SECOND_MS};
