//! # KeyShield Deal Lifecycle Core
//!
//! The state machine and coordination logic that takes a multisig TRON
//! escrow deal from creation through funding, work, completion, dispute and
//! settlement.
//!
//! ## Guarantees
//!
//! | Guarantee | Enforcement |
//! |-----------|-------------|
//! | One active deal per user | conditional claim on `User.active_deal_id` |
//! | Atomic deal ids | counter upsert-and-increment (`CounterStore`) |
//! | Linearized per-deal transitions | per-deal mutex + status CAS in the repository |
//! | Idempotent deposits and expiry | CAS on `(id, expected_status)` |
//! | Exact settlement arithmetic | `released + refunded + withheld = amount` |
//! | Partner accounting | ledger recompute on every terminal transition |
//!
//! ## Module Structure (Hexagonal Architecture)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      OUTER LAYER                                │
//! │  adapters/ - memory & RocksDB stores, simulated TRON chain,     │
//! │              cached price oracle, tracing notifier              │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ implements ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      MIDDLE LAYER                               │
//! │  ports/inbound.rs  - DealLifecycleApi, DisputeApi, AdminApi,    │
//! │                      PartnerApi                                 │
//! │  ports/outbound.rs - BlockchainPort, NotificationPort,          │
//! │                      PriceOracle, repositories, SessionStore    │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      INNER LAYER                                │
//! │  domain/   - Deal, Dispute, User, Platform, commission math,    │
//! │              status transition table, error taxonomy            │
//! │  service/  - DealLifecycleEngine, DisputeEngine, PartnerLedger, │
//! │              DepositMonitor, DeadlineMonitor, payout retry      │
//! │  events.rs - domain events + in-process bus                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod adapters;
pub mod config;
pub mod domain;
pub mod events;
pub mod ports;
pub mod service;

// Re-exports
pub use config::{EngineConfig, PayoutRetryPolicy};
pub use domain::{
    commission, Actor, AuditAction, AuditEntry, Comment, CommissionPayer, Deal, DealDraft,
    DealError, DealStatus, Dispute, DisputeDecision, DisputeDraft, DisputeStats, DisputeStatus,
    EnergyMethod, OperationalCosts, Platform, PlatformStats, Role, SavedWallet, SessionKind,
    StoreError, User, WalletFault, WorkSubmission, BLACKLIST_REASON_DISPUTE_STREAK,
    DISPUTE_LOSS_STREAK_LIMIT, MAX_DISPUTE_COMMENTS,
};
pub use events::{DealEvent, DealEventBus, DealEventHandler};
pub use ports::{
    AdminApi, AuditSink, BlockchainPort, CounterStore, CreateDealRequest, DealFilter,
    DealLifecycleApi, DealRepository, DepositEvent, DisputeApi, DisputeRepository,
    MultisigCreated, NotificationKind, NotificationPort, NotifyError, PayoutReceipt,
    PlatformRepository, PriceOracle, SessionStore, UserRepository,
};
pub use service::{
    DeadlineMonitor, DealLifecycleEngine, DepositMonitor, DisputeEngine, EngineDeps,
    LedgerRecomputeHandler, LockRegistry, PartnerLedger, PartnerService, PayoutJob, PayoutKind,
    PayoutQueue, PayoutRetryWorker,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
