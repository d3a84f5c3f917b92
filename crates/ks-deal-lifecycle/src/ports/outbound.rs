//! # Outbound Ports
//!
//! Traits for everything the core depends on: the TRON collaborator, the
//! Telegram side-channel, the price feed and the document store. Every
//! repository speaks [`StoreError`]; the engine maps those into the deal
//! error taxonomy at its boundary.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use shared_types::{Asset, DealId, PlatformCode, TelegramId, TimestampMs, TxHash, WalletAddress};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::domain::{
    AuditEntry, Deal, DealError, DealStatus, Dispute, EnergyMethod, Platform, SessionKind, User,
};
use crate::ports::inbound::DealFilter;
use crate::StoreError;

// =============================================================================
// Blockchain
// =============================================================================

/// A deposit observed on a watched multisig address.
#[derive(Debug, Clone, PartialEq)]
pub struct DepositEvent {
    /// The receiving multisig address.
    pub address: WalletAddress,
    /// Transaction hash of the deposit.
    pub tx_hash: TxHash,
    /// Deposited amount, in the deal's asset.
    pub amount: Decimal,
    /// Confirmations at observation time.
    pub confirmations: u32,
}

/// Result of creating a 2-of-3 multisig.
#[derive(Debug, Clone, PartialEq)]
pub struct MultisigCreated {
    /// The fresh multisig address.
    pub address: WalletAddress,
    /// TRX spent activating it.
    pub activation_cost_trx: Decimal,
}

/// Result of a release or refund submission.
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutReceipt {
    /// Transaction hash of the payout.
    pub tx_hash: TxHash,
    /// TRX-equivalent fee the service paid.
    pub fee_trx: Decimal,
    /// How transaction energy was provisioned.
    pub energy_method: EnergyMethod,
}

/// The TRON collaborator - outbound port.
///
/// Key custody, signing and confirmation tracking live behind this trait;
/// the core only sees addresses, hashes and fees.
#[async_trait]
pub trait BlockchainPort: Send + Sync {
    /// Check that an address is well-formed and activated.
    async fn verify_wallet(&self, address: &WalletAddress) -> Result<(), DealError>;

    /// Create a 2-of-3 multisig over the given keys.
    async fn create_multisig(
        &self,
        buyer: &WalletAddress,
        seller: &WalletAddress,
        service: &WalletAddress,
    ) -> Result<MultisigCreated, DealError>;

    /// Start watching an address for deposits.
    fn subscribe_deposits(&self, address: &WalletAddress);

    /// The shared stream of deposits to watched addresses.
    fn deposit_stream(&self) -> broadcast::Receiver<DepositEvent>;

    /// Pay the seller out of the multisig.
    async fn release(
        &self,
        multisig: &WalletAddress,
        to: &WalletAddress,
        amount: Decimal,
        asset: Asset,
    ) -> Result<PayoutReceipt, DealError>;

    /// Return the deposit to the buyer.
    async fn refund(
        &self,
        multisig: &WalletAddress,
        to: &WalletAddress,
        amount: Decimal,
        asset: Asset,
    ) -> Result<PayoutReceipt, DealError>;
}

// =============================================================================
// Notifications
// =============================================================================

/// Notification kinds the Telegram side-channel understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    DealCreated,
    DepositReceived,
    WorkSubmitted,
    Completed,
    DisputeOpened,
    DisputeResolved,
    DeadlineWarning,
    Cancelled,
    Expired,
}

impl NotificationKind {
    /// Stable identifier for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DealCreated => "deal_created",
            Self::DepositReceived => "deposit_received",
            Self::WorkSubmitted => "work_submitted",
            Self::Completed => "completed",
            Self::DisputeOpened => "dispute_opened",
            Self::DisputeResolved => "dispute_resolved",
            Self::DeadlineWarning => "deadline_warning",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

/// A notification dispatch failure. The core logs these and never retries;
/// the Telegram side-channel has its own retry policy.
#[derive(Debug, Clone, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Fire-and-forget messages to the Telegram side-channel.
#[async_trait]
pub trait NotificationPort: Send + Sync {
    /// Send one message. The core spawns these and never awaits delivery.
    async fn send(
        &self,
        user: TelegramId,
        kind: NotificationKind,
        payload: Value,
    ) -> Result<(), NotifyError>;
}

// =============================================================================
// Price feed
// =============================================================================

/// Cached TRX→USD rate. Infallible by contract: adapters fall back to a
/// configured constant when the feed is down.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Current TRX price in USD.
    async fn trx_price_usd(&self) -> Decimal;
}

// =============================================================================
// Repositories
// =============================================================================

/// Deal persistence with a conditional status write.
#[async_trait]
pub trait DealRepository: Send + Sync {
    /// Insert a new deal. Fails with `AlreadyExists` on id collision.
    async fn insert(&self, deal: &Deal) -> Result<(), StoreError>;

    /// Fetch by id.
    async fn get(&self, id: &DealId) -> Result<Option<Deal>, StoreError>;

    /// Unconditional update of non-status fields. Only call while holding
    /// the deal's transition lock.
    async fn update(&self, deal: &Deal) -> Result<(), StoreError>;

    /// Conditional write: persist `deal` only if the stored status still
    /// equals `expected`. This is the authoritative serialization of the
    /// lifecycle; a `StatusConflict` means the event was stale.
    async fn transition(&self, deal: &Deal, expected: DealStatus) -> Result<(), StoreError>;

    /// Find the deal funded through the given multisig address.
    async fn find_by_multisig(
        &self,
        address: &WalletAddress,
    ) -> Result<Option<Deal>, StoreError>;

    /// Non-terminal deals whose deadline is at or before `cutoff`.
    async fn with_deadline_before(&self, cutoff: TimestampMs) -> Result<Vec<Deal>, StoreError>;

    /// Deals whose payout submission is pending retry.
    async fn list_payout_pending(&self) -> Result<Vec<Deal>, StoreError>;

    /// Deals affiliated with a platform, newest first.
    async fn list_by_platform(
        &self,
        code: &PlatformCode,
        filter: &DealFilter,
    ) -> Result<Vec<Deal>, StoreError>;
}

/// User persistence, including the active-deal claim.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user. Fails with `AlreadyExists` for a known id.
    async fn insert(&self, user: &User) -> Result<(), StoreError>;

    /// Fetch by Telegram id.
    async fn get(&self, id: TelegramId) -> Result<Option<User>, StoreError>;

    /// Unconditional update.
    async fn update(&self, user: &User) -> Result<(), StoreError>;

    /// Conditional claim: set `active_deal_id = deal` only if it is
    /// currently empty. `ActiveDealTaken` enforces one active deal per user.
    async fn try_claim_active_deal(
        &self,
        user: TelegramId,
        deal: &DealId,
    ) -> Result<(), StoreError>;

    /// Clear the claim, but only if it still points at `deal`.
    async fn release_active_deal(&self, user: TelegramId, deal: &DealId)
        -> Result<(), StoreError>;

    /// Users sourced by a platform.
    async fn count_by_platform(&self, code: &PlatformCode) -> Result<u64, StoreError>;
}

/// Dispute persistence. Unique per deal.
#[async_trait]
pub trait DisputeRepository: Send + Sync {
    /// Create a dispute; `AlreadyExists` if the deal already has one.
    async fn create(&self, dispute: &Dispute) -> Result<(), StoreError>;

    /// Fetch the dispute for a deal.
    async fn get(&self, deal_id: &DealId) -> Result<Option<Dispute>, StoreError>;

    /// Update an existing dispute.
    async fn update(&self, dispute: &Dispute) -> Result<(), StoreError>;

    /// Remove the dispute for a deal (compensation path only).
    async fn remove(&self, deal_id: &DealId) -> Result<(), StoreError>;

    /// All disputes not yet resolved.
    async fn list_unresolved(&self) -> Result<Vec<Dispute>, StoreError>;
}

/// Platform persistence.
#[async_trait]
pub trait PlatformRepository: Send + Sync {
    /// Insert a new platform.
    async fn insert(&self, platform: &Platform) -> Result<(), StoreError>;

    /// Fetch by code.
    async fn get(&self, code: &PlatformCode) -> Result<Option<Platform>, StoreError>;

    /// Update, including the denormalized stats block.
    async fn update(&self, platform: &Platform) -> Result<(), StoreError>;

    /// All platforms.
    async fn list(&self) -> Result<Vec<Platform>, StoreError>;
}

/// Named atomic counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomic upsert-and-increment; returns the new value. Values are
    /// monotonic but not dense: a wasted value is never recycled.
    async fn next_value(&self, name: &str) -> Result<u64, StoreError>;
}

/// Append-only audit log.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one entry.
    async fn append(&self, entry: AuditEntry) -> Result<(), StoreError>;

    /// Entries for one deal, in append order.
    async fn for_deal(&self, deal_id: &DealId) -> Result<Vec<AuditEntry>, StoreError>;
}

/// Advisory TTL blob store for multi-message input flows.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a blob under `(user, kind)` with a TTL.
    async fn put(
        &self,
        user: TelegramId,
        kind: SessionKind,
        value: Value,
        ttl_ms: u64,
    ) -> Result<(), StoreError>;

    /// Fetch a blob; expired sessions read as absent.
    async fn get(&self, user: TelegramId, kind: SessionKind) -> Result<Option<Value>, StoreError>;

    /// Drop a blob.
    async fn remove(&self, user: TelegramId, kind: SessionKind) -> Result<(), StoreError>;

    /// Purge expired sessions; returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, StoreError>;
}
