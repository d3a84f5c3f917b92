//! # Service Layer
//!
//! Orchestrates domain logic over the ports: the lifecycle engine itself,
//! the dispute conversation, the partner ledger, both monitors and the
//! payout retry worker.

pub mod deadline_monitor;
pub mod deposit_monitor;
pub mod dispute_engine;
pub mod engine;
pub mod locks;
pub mod partner_ledger;
pub mod payout_retry;

pub use deadline_monitor::DeadlineMonitor;
pub use deposit_monitor::DepositMonitor;
pub use dispute_engine::DisputeEngine;
pub use engine::{DealLifecycleEngine, EngineDeps};
pub use locks::LockRegistry;
pub use partner_ledger::{LedgerRecomputeHandler, PartnerLedger, PartnerService};
pub use payout_retry::{PayoutJob, PayoutKind, PayoutQueue, PayoutRetryWorker};
