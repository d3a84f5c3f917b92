//! Deal status machine and participant roles.
//!
//! The transition table here is the single authority on which moves are
//! legal; the engine layers guards (callers, deadlines, funding) on top of
//! it. Persistence stores statuses as snake_case strings and must round-trip
//! through [`DealStatus::parse`] at the boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Side of the escrow a user stands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Buyer,
    Seller,
}

impl Role {
    /// The opposite side.
    pub fn other(self) -> Self {
        match self {
            Self::Buyer => Self::Seller,
            Self::Seller => Self::Buyer,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buyer => f.write_str("buyer"),
            Self::Seller => f.write_str("seller"),
        }
    }
}

/// Who bears the platform commission at settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionPayer {
    Buyer,
    Seller,
    Split,
}

/// Deal lifecycle states.
///
/// Happy path:
/// `created → waiting_for_* → waiting_for_deposit → locked → in_progress →
/// work_submitted → completed`. Disputes branch to `dispute → resolved`.
/// `expired`, `cancelled` and `refunded` are the remaining terminals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    Created,
    WaitingForSellerWallet,
    WaitingForBuyerWallet,
    WaitingForDeposit,
    Locked,
    InProgress,
    WorkSubmitted,
    Completed,
    Dispute,
    Resolved,
    Expired,
    Cancelled,
    Refunded,
}

impl DealStatus {
    /// Terminal set. A user's active-deal slot is released exactly when the
    /// deal enters one of these.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Resolved | Self::Expired | Self::Cancelled | Self::Refunded
        )
    }

    /// Pre-funding states that a deadline can expire or a participant can
    /// cancel.
    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            Self::WaitingForSellerWallet | Self::WaitingForBuyerWallet | Self::WaitingForDeposit
        )
    }

    /// States in which escrow funds sit on the multisig.
    pub fn is_funded(self) -> bool {
        matches!(
            self,
            Self::Locked | Self::InProgress | Self::WorkSubmitted | Self::Dispute
        )
    }

    /// Check if a transition is legal, ignoring caller and timing guards.
    pub fn can_transition_to(self, next: DealStatus) -> bool {
        match (self, next) {
            (Self::Created, Self::WaitingForSellerWallet) => true,
            (Self::Created, Self::WaitingForBuyerWallet) => true,
            (Self::WaitingForBuyerWallet, Self::WaitingForSellerWallet) => true,
            // Counterparty wallet already known via a saved-wallet template.
            (Self::WaitingForBuyerWallet, Self::WaitingForDeposit) => true,
            (Self::WaitingForSellerWallet, Self::WaitingForDeposit) => true,
            (Self::WaitingForDeposit, Self::Locked) => true,
            (Self::Locked, Self::InProgress) => true,
            (Self::Locked, Self::WorkSubmitted) => true,
            (Self::InProgress, Self::WorkSubmitted) => true,
            (Self::WorkSubmitted, Self::Completed) => true,
            (Self::Locked | Self::InProgress | Self::WorkSubmitted, Self::Dispute) => true,
            (Self::Dispute, Self::Resolved) => true,
            // Admin cancels the dispute and reopens the working phase.
            (Self::Dispute, Self::Locked) => true,
            (from, Self::Expired) if from.is_waiting() => true,
            (from, Self::Cancelled) if from.is_waiting() => true,
            _ => false,
        }
    }

    /// snake_case form used in persistence, logs and metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::WaitingForSellerWallet => "waiting_for_seller_wallet",
            Self::WaitingForBuyerWallet => "waiting_for_buyer_wallet",
            Self::WaitingForDeposit => "waiting_for_deposit",
            Self::Locked => "locked",
            Self::InProgress => "in_progress",
            Self::WorkSubmitted => "work_submitted",
            Self::Completed => "completed",
            Self::Dispute => "dispute",
            Self::Resolved => "resolved",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    /// Validate a persisted string at the storage boundary.
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "created" => Self::Created,
            "waiting_for_seller_wallet" => Self::WaitingForSellerWallet,
            "waiting_for_buyer_wallet" => Self::WaitingForBuyerWallet,
            "waiting_for_deposit" => Self::WaitingForDeposit,
            "locked" => Self::Locked,
            "in_progress" => Self::InProgress,
            "work_submitted" => Self::WorkSubmitted,
            "completed" => Self::Completed,
            "dispute" => Self::Dispute,
            "resolved" => Self::Resolved,
            "expired" => Self::Expired,
            "cancelled" => Self::Cancelled,
            "refunded" => Self::Refunded,
            _ => return None,
        })
    }

    /// Every status, for reachability checks and admin tooling.
    pub fn all() -> [DealStatus; 13] {
        [
            Self::Created,
            Self::WaitingForSellerWallet,
            Self::WaitingForBuyerWallet,
            Self::WaitingForDeposit,
            Self::Locked,
            Self::InProgress,
            Self::WorkSubmitted,
            Self::Completed,
            Self::Dispute,
            Self::Resolved,
            Self::Expired,
            Self::Cancelled,
            Self::Refunded,
        ]
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
