//! # Inbound Ports
//!
//! The operations callers drive the core with. The Telegram bot speaks
//! [`DealLifecycleApi`] and [`DisputeApi`]; the admin console speaks
//! [`AdminApi`]; the partner portal reads through [`PartnerApi`].

use async_trait::async_trait;
use rust_decimal::Decimal;
use shared_types::{Asset, DealId, PlatformCode, TelegramId, TxHash, WalletAddress};

use crate::domain::{
    Actor, CommissionPayer, Deal, DealError, DealStatus, Dispute, DisputeDecision, PlatformStats,
    Role,
};

/// Everything `create_deal` needs. The commission and the deal id are
/// computed by the engine, never passed in.
#[derive(Debug, Clone)]
pub struct CreateDealRequest {
    /// The user creating the deal.
    pub creator: TelegramId,
    /// The other side.
    pub counterparty: TelegramId,
    /// Which side the creator stands on.
    pub creator_role: Role,
    /// Product name.
    pub product: String,
    /// Free-text description.
    pub description: String,
    /// Escrow amount.
    pub amount: Decimal,
    /// Escrowed asset.
    pub asset: Asset,
    /// Who bears the commission.
    pub commission_payer: CommissionPayer,
    /// Funding deadline, hours from now.
    pub deadline_hours: u64,
    /// Creator's payout wallet, when already known from the input flow.
    pub creator_wallet: Option<WalletAddress>,
}

/// Filters for partner deal listings.
#[derive(Debug, Clone, Default)]
pub struct DealFilter {
    /// Restrict to one status.
    pub status: Option<DealStatus>,
    /// Include admin-hidden deals. Partner reads leave this off.
    pub include_hidden: bool,
}

/// The deal lifecycle state machine - inbound port.
#[async_trait]
pub trait DealLifecycleApi: Send + Sync {
    /// Create a deal. Claims the active-deal slot of both participants or
    /// fails without a trace.
    async fn create_deal(&self, request: CreateDealRequest) -> Result<Deal, DealError>;

    /// Provide the caller's payout wallet for a waiting deal.
    async fn provide_wallet(
        &self,
        deal_id: &DealId,
        caller: TelegramId,
        address: WalletAddress,
    ) -> Result<Deal, DealError>;

    /// Provide a wallet previously saved under `label`.
    async fn provide_saved_wallet(
        &self,
        deal_id: &DealId,
        caller: TelegramId,
        label: &str,
    ) -> Result<Deal, DealError>;

    /// Apply an observed deposit. Idempotent per transaction hash.
    async fn deposit_detected(
        &self,
        deal_id: &DealId,
        tx_hash: TxHash,
        amount: Decimal,
        confirmations: u32,
    ) -> Result<Deal, DealError>;

    /// Seller acknowledges the locked deal and starts working.
    async fn start_work(&self, deal_id: &DealId, caller: TelegramId) -> Result<Deal, DealError>;

    /// Seller submits completed work.
    async fn submit_work(
        &self,
        deal_id: &DealId,
        caller: TelegramId,
        description: String,
    ) -> Result<Deal, DealError>;

    /// Buyer confirms the work; settles the deal.
    async fn confirm(&self, deal_id: &DealId, caller: TelegramId) -> Result<Deal, DealError>;

    /// Cancel a deal that has not been funded yet.
    async fn cancel(&self, deal_id: &DealId, actor: Actor) -> Result<Deal, DealError>;

    /// Open a dispute on a funded deal.
    async fn open_dispute(
        &self,
        deal_id: &DealId,
        caller: TelegramId,
        reason: String,
        media: Vec<String>,
    ) -> Result<Dispute, DealError>;

    /// Expire a deal whose deadline passed. Idempotent: returns `Ok(None)`
    /// when the deal already left the expirable states.
    async fn deadline_expired(&self, deal_id: &DealId) -> Result<Option<Deal>, DealError>;

    /// Auto-release a submitted work the buyer never confirmed. Idempotent
    /// like [`Self::deadline_expired`].
    async fn auto_release(&self, deal_id: &DealId) -> Result<Option<Deal>, DealError>;
}

/// Dispute conversation - inbound port.
#[async_trait]
pub trait DisputeApi: Send + Sync {
    /// Fetch the dispute for a deal.
    async fn get_dispute(&self, deal_id: &DealId) -> Result<Dispute, DealError>;

    /// Append a comment. Arbiter comments move an open dispute to review.
    async fn add_comment(
        &self,
        deal_id: &DealId,
        actor: Actor,
        text: String,
    ) -> Result<Dispute, DealError>;
}

/// Admin commands - inbound port. Every call is audited.
#[async_trait]
pub trait AdminApi: Send + Sync {
    /// Resolve a dispute with a verdict. Requires admin.
    async fn resolve_dispute(
        &self,
        deal_id: &DealId,
        actor: Actor,
        decision: DisputeDecision,
        reason: String,
    ) -> Result<Deal, DealError>;

    /// Cancel a dispute and put the deal back to `locked` with a fresh
    /// deadline. Requires admin.
    async fn cancel_dispute(
        &self,
        deal_id: &DealId,
        actor: Actor,
        new_deadline_hours: u64,
    ) -> Result<Deal, DealError>;

    /// Force a deal into an arbitrary status. Requires superadmin. A forced
    /// `refunded` on a funded deal issues the on-chain refund first.
    async fn force_status(
        &self,
        deal_id: &DealId,
        actor: Actor,
        target: DealStatus,
        reason: String,
    ) -> Result<Deal, DealError>;

    /// Blacklist a user. Requires admin.
    async fn ban_user(
        &self,
        actor: Actor,
        user: TelegramId,
        reason: String,
    ) -> Result<(), DealError>;

    /// Remove a user from the blacklist. Requires admin.
    async fn unban_user(&self, actor: Actor, user: TelegramId) -> Result<(), DealError>;

    /// Toggle the soft-hidden flag on a deal. Requires admin.
    async fn toggle_deal_hidden(&self, actor: Actor, deal_id: &DealId)
        -> Result<Deal, DealError>;
}

/// Partner portal reads - inbound port. Read-only over DLC state.
#[async_trait]
pub trait PartnerApi: Send + Sync {
    /// Live denormalized stats for a platform.
    async fn get_stats(&self, code: &PlatformCode) -> Result<PlatformStats, DealError>;

    /// Deals sourced by a platform. Hidden deals are excluded.
    async fn list_deals(
        &self,
        code: &PlatformCode,
        filter: DealFilter,
    ) -> Result<Vec<Deal>, DealError>;
}
