//! The deal aggregate.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared_types::{Asset, DealId, PlatformCode, TelegramId, TimestampMs, TxHash, WalletAddress};

use super::errors::DealError;
use super::status::{CommissionPayer, DealStatus, Role};

/// How transaction energy was provisioned for a payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyMethod {
    /// Rented energy, the cheap path.
    Feesaver,
    /// Energy paid by burning TRX directly.
    Trx,
    /// Neither worked; the multisig was funded with fallback TRX.
    None,
}

impl EnergyMethod {
    /// Stable identifier for logs and audit payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Feesaver => "feesaver",
            Self::Trx => "trx",
            Self::None => "none",
        }
    }
}

/// Seller's completed-work submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSubmission {
    /// Free-text description of the delivered work.
    pub description: String,
    /// When it was submitted.
    pub submitted_at: TimestampMs,
}

/// On-chain TRX the service spends running one deal.
///
/// Accrues through the lifecycle: activation at multisig creation, energy
/// or fallback at payout. Priced in USD once, at completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationalCosts {
    /// TRX spent activating the multisig.
    pub activation_trx: Decimal,
    /// Unused activation TRX returned to the service wallet.
    pub activation_returned_trx: Decimal,
    /// Energy-provision method used at payout, if a payout happened.
    pub energy_method: Option<EnergyMethod>,
    /// TRX-equivalent cost of the energy used.
    pub energy_trx: Decimal,
    /// Extra TRX funded into the multisig when FeeSaver failed.
    pub fallback_trx: Decimal,
    /// TRX/USD rate read once at completion.
    pub trx_price_at_completion: Option<Decimal>,
}

impl OperationalCosts {
    /// Net TRX spent on this deal.
    pub fn total_trx(&self) -> Decimal {
        self.activation_trx - self.activation_returned_trx + self.energy_trx + self.fallback_trx
    }

    /// USD value of the TRX spent, at the completion-time rate.
    pub fn total_usd(&self) -> Option<Decimal> {
        self.trx_price_at_completion
            .map(|price| self.total_trx() * price)
    }
}

/// Parameters for building a new deal. The engine allocates the id and
/// computes the commission before calling [`Deal::new`].
#[derive(Debug, Clone)]
pub struct DealParams {
    pub id: DealId,
    pub buyer: TelegramId,
    pub seller: TelegramId,
    pub creator_role: Role,
    pub product: String,
    pub description: String,
    pub amount: Decimal,
    pub asset: Asset,
    pub commission: Decimal,
    pub commission_payer: CommissionPayer,
    pub platform_code: Option<PlatformCode>,
    pub deadline: TimestampMs,
    pub created_at: TimestampMs,
}

/// The aggregate root of the lifecycle core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    /// Human-readable id, `D-<n>`.
    pub id: DealId,
    /// Buyer side.
    pub buyer: TelegramId,
    /// Seller side.
    pub seller: TelegramId,
    /// Which side created the deal.
    pub creator_role: Role,
    /// Product name.
    pub product: String,
    /// Free-text description.
    pub description: String,
    /// Escrowed amount.
    pub amount: Decimal,
    /// Escrowed asset.
    pub asset: Asset,
    /// Commission owed at settlement.
    pub commission: Decimal,
    /// Who bears the commission.
    pub commission_payer: CommissionPayer,
    /// Affiliate platform that sourced the deal, if any.
    pub platform_code: Option<PlatformCode>,
    /// 2-of-3 multisig address; set once both payout wallets are known.
    pub multisig_address: Option<WalletAddress>,
    /// Buyer payout address.
    pub buyer_address: Option<WalletAddress>,
    /// Seller payout address.
    pub seller_address: Option<WalletAddress>,
    /// Hash of the deposit that locked the deal.
    pub deposit_tx: Option<TxHash>,
    /// Hash of the settlement payout.
    pub payout_tx: Option<TxHash>,
    /// Settlement decided but the payout submission keeps failing; the
    /// retry worker owns the deal until this clears.
    pub payout_pending: bool,
    /// Funding/working deadline, absolute UTC.
    pub deadline: TimestampMs,
    /// Creation instant.
    pub created_at: TimestampMs,
    /// Set exactly when the deal enters a terminal status.
    pub completed_at: Option<TimestampMs>,
    /// Soft-hidden by an admin; excluded from partner listings.
    pub hidden: bool,
    /// Current lifecycle status.
    pub status: DealStatus,
    /// Seller's work submission, once made.
    pub work: Option<WorkSubmission>,
    /// On-chain cost record.
    pub costs: OperationalCosts,
}

impl Deal {
    /// Build a freshly created deal, checking the structural invariants.
    pub fn new(params: DealParams) -> Result<Self, DealError> {
        if params.buyer == params.seller {
            return Err(DealError::InvariantViolation(
                "buyer and seller must differ".into(),
            ));
        }
        if params.amount <= Decimal::ZERO {
            return Err(DealError::InvariantViolation(
                "amount must be positive".into(),
            ));
        }
        if params.commission > params.amount {
            return Err(DealError::InvariantViolation(
                "commission exceeds amount".into(),
            ));
        }
        if params.deadline <= params.created_at {
            return Err(DealError::InvariantViolation(
                "deadline must be after creation".into(),
            ));
        }

        Ok(Self {
            id: params.id,
            buyer: params.buyer,
            seller: params.seller,
            creator_role: params.creator_role,
            product: params.product,
            description: params.description,
            amount: params.amount,
            asset: params.asset,
            commission: params.commission,
            commission_payer: params.commission_payer,
            platform_code: params.platform_code,
            multisig_address: None,
            buyer_address: None,
            seller_address: None,
            deposit_tx: None,
            payout_tx: None,
            payout_pending: false,
            deadline: params.deadline,
            created_at: params.created_at,
            completed_at: None,
            hidden: false,
            status: DealStatus::Created,
            work: None,
            costs: OperationalCosts::default(),
        })
    }

    /// The user who created the deal.
    pub fn creator(&self) -> TelegramId {
        match self.creator_role {
            Role::Buyer => self.buyer,
            Role::Seller => self.seller,
        }
    }

    /// Role of `user` in this deal, if they participate at all.
    pub fn role_of(&self, user: TelegramId) -> Option<Role> {
        if user == self.buyer {
            Some(Role::Buyer)
        } else if user == self.seller {
            Some(Role::Seller)
        } else {
            None
        }
    }

    /// Whether `user` is the buyer or the seller.
    pub fn is_participant(&self, user: TelegramId) -> bool {
        self.role_of(user).is_some()
    }

    /// The other side of the table.
    pub fn counterparty_of(&self, user: TelegramId) -> Option<TelegramId> {
        match self.role_of(user)? {
            Role::Buyer => Some(self.seller),
            Role::Seller => Some(self.buyer),
        }
    }

    /// Payout wallet for a given role, once assigned.
    pub fn wallet_of(&self, role: Role) -> Option<&WalletAddress> {
        match role {
            Role::Buyer => self.buyer_address.as_ref(),
            Role::Seller => self.seller_address.as_ref(),
        }
    }

    /// Assign the payout wallet for a role.
    pub fn set_wallet(&mut self, role: Role, address: WalletAddress) {
        match role {
            Role::Buyer => self.buyer_address = Some(address),
            Role::Seller => self.seller_address = Some(address),
        }
    }

    /// Both payout wallets known; the multisig can be created.
    pub fn wallets_complete(&self) -> bool {
        self.buyer_address.is_some() && self.seller_address.is_some()
    }

    /// Whether the funding deadline has passed.
    pub fn is_past_deadline(&self, now: TimestampMs) -> bool {
        now >= self.deadline
    }
}
