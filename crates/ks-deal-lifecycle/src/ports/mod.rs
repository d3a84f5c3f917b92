//! # Ports
//!
//! Inbound ports are the operations callers drive the core with; outbound
//! ports are the collaborators the core depends on. Adapters implement the
//! outbound side, services the inbound side.

pub mod inbound;
pub mod outbound;

pub use inbound::{
    AdminApi, CreateDealRequest, DealFilter, DealLifecycleApi, DisputeApi, PartnerApi,
};
pub use outbound::{
    AuditSink, BlockchainPort, CounterStore, DealRepository, DepositEvent, DisputeRepository,
    MultisigCreated, NotificationKind, NotificationPort, NotifyError, PayoutReceipt,
    PlatformRepository, PriceOracle, SessionStore, UserRepository,
};
