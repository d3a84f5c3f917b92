//! Error taxonomy of the deal lifecycle core.
//!
//! Callers (the Telegram bot, the admin console, the partner portal) map
//! these onto user-facing messages; the engine never formats copy itself.
//! Recoverable kinds (`StaleState`, `BlockchainUnavailable`, `WalletInvalid`)
//! are surfaced with no state change.

use rust_decimal::Decimal;
use shared_types::{DealId, PlatformCode, TelegramId};
use thiserror::Error;

use super::status::DealStatus;

/// Why a wallet address was rejected by the chain collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletFault {
    /// Address not present / never activated on chain.
    NotFound,
    /// The verification API itself failed.
    ApiError,
    /// Not a syntactically valid TRON address.
    BadFormat,
}

impl WalletFault {
    /// Stable identifier used in logs and audit payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::ApiError => "api_error",
            Self::BadFormat => "invalid_format",
        }
    }
}

/// Storage-layer failures, shared by every repository trait.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The document does not exist.
    #[error("document not found: {0}")]
    NotFound(String),

    /// Insert hit an existing document with the same key.
    #[error("document already exists: {0}")]
    AlreadyExists(String),

    /// Conditional status write lost the race; `actual` is what the store
    /// held at check time.
    #[error("status conflict: stored status is {actual}")]
    StatusConflict {
        /// Status found in the store.
        actual: DealStatus,
    },

    /// Conditional claim on a user's active-deal slot lost the race.
    #[error("active-deal slot already taken")]
    ActiveDealTaken,

    /// A persisted document failed to decode.
    #[error("serialization failure: {0}")]
    Serialization(String),

    /// The storage backend itself failed.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Errors surfaced by the deal lifecycle core.
#[derive(Debug, Error)]
pub enum DealError {
    /// Input fails a pre-condition (amount, deadline, self-deal, ...).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Conditional status write failed; the caller should re-read and decide.
    #[error("stale state on {deal_id}: expected {expected}, found {actual}")]
    StaleState {
        deal_id: DealId,
        expected: DealStatus,
        actual: DealStatus,
    },

    /// The single-active-deal constraint.
    #[error("user {user_id} already has an active deal")]
    UserHasActiveDeal { user_id: TelegramId },

    /// User is on the blacklist.
    #[error("user {user_id} is blacklisted")]
    UserBlacklisted { user_id: TelegramId },

    /// Wallet verification rejected the address.
    #[error("wallet rejected ({})", fault.as_str())]
    WalletInvalid { fault: WalletFault },

    /// Transient chain failure; the caller may retry.
    #[error("blockchain unavailable: {0}")]
    BlockchainUnavailable(String),

    /// Deposit below the deal amount; overpay is tolerated, underpay is not.
    #[error("deposit insufficient: required {required}, received {received}")]
    DepositInsufficient {
        required: Decimal,
        received: Decimal,
    },

    /// A deal carries at most one dispute.
    #[error("dispute already exists for {0}")]
    DisputeAlreadyExists(DealId),

    /// Dispute comment cap reached.
    #[error("comment limit of {max} reached")]
    CommentLimit { max: usize },

    /// Caller lacks the required role.
    #[error("not authorized: {0}")]
    NotAuthorized(&'static str),

    /// Target state not reachable from the current state.
    #[error("deal {deal_id} in status {status} cannot accept {event}")]
    Conflict {
        deal_id: DealId,
        status: DealStatus,
        event: &'static str,
    },

    /// No such deal.
    #[error("deal {0} not found")]
    DealNotFound(DealId),

    /// No such user.
    #[error("user {0} not found")]
    UserNotFound(TelegramId),

    /// No dispute recorded for the deal.
    #[error("dispute for {0} not found")]
    DisputeNotFound(DealId),

    /// No such partner platform.
    #[error("platform {0} not found")]
    PlatformNotFound(PlatformCode),

    /// Unexpected persistence failure; fatal for the operation.
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl DealError {
    /// Whether the caller may retry without operator involvement.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::StaleState { .. } | Self::BlockchainUnavailable(_) | Self::WalletInvalid { .. }
        )
    }
}
