//! Advisory input-flow sessions.
//!
//! Deal creation and dispute authoring span several Telegram messages; the
//! partially entered input is buffered here. Sessions are never
//! authoritative: losing one loses typed text, never a deal.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared_types::{Asset, WalletAddress};

use super::status::{CommissionPayer, Role};

/// Which multi-message flow a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    DealDraft,
    DisputeDraft,
}

impl SessionKind {
    /// Stable key fragment for the session store.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DealDraft => "deal_draft",
            Self::DisputeDraft => "dispute_draft",
        }
    }
}

/// Partially entered deal-creation input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DealDraft {
    pub counterparty_handle: Option<String>,
    pub creator_role: Option<Role>,
    pub product: Option<String>,
    pub description: Option<String>,
    pub amount: Option<Decimal>,
    pub asset: Option<Asset>,
    pub commission_payer: Option<CommissionPayer>,
    pub deadline_hours: Option<u64>,
    pub creator_wallet: Option<WalletAddress>,
}

impl DealDraft {
    /// All fields required to call `create_deal` are present.
    pub fn is_complete(&self) -> bool {
        self.counterparty_handle.is_some()
            && self.creator_role.is_some()
            && self.product.is_some()
            && self.amount.is_some()
            && self.asset.is_some()
            && self.commission_payer.is_some()
            && self.deadline_hours.is_some()
    }
}

/// Partially entered dispute input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisputeDraft {
    pub reason: Option<String>,
    pub media: Vec<String>,
}
