//! # Domain Events
//!
//! Events emitted by the engine after a transition persists. Two kinds of
//! consumers exist:
//!
//! - **Handlers** run inline, in registration order, before the emitting
//!   call returns; the partner-ledger recompute lives here so terminal
//!   transitions and stats stay causally ordered.
//! - **Observers** receive a broadcast copy and run on their own schedule;
//!   a lagging observer never slows the engine down.

use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::{DealId, PlatformCode, TelegramId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::{DealStatus, DisputeDecision, Role};

/// Default broadcast capacity before a slow observer starts lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Everything the engine announces to the rest of the process.
#[derive(Debug, Clone, PartialEq)]
pub enum DealEvent {
    /// A deal was created and both participants claimed.
    DealCreated {
        deal_id: DealId,
        buyer: TelegramId,
        seller: TelegramId,
        platform: Option<PlatformCode>,
    },
    /// A payout wallet was assigned.
    WalletAssigned { deal_id: DealId, role: Role },
    /// A sufficient deposit locked the deal.
    DepositLocked { deal_id: DealId },
    /// The seller acknowledged the deal and started working.
    WorkStarted { deal_id: DealId },
    /// The seller submitted completed work.
    WorkSubmitted { deal_id: DealId },
    /// A participant opened a dispute.
    DisputeOpened { deal_id: DealId, opener: TelegramId },
    /// An arbiter resolved a dispute.
    DisputeResolved {
        deal_id: DealId,
        decision: DisputeDecision,
    },
    /// The deal reached a terminal status. Drives ledger recomputation.
    DealTerminated {
        deal_id: DealId,
        platform: Option<PlatformCode>,
        status: DealStatus,
    },
    /// A payout submission failed and a retry was queued.
    PayoutRetryScheduled { deal_id: DealId, attempt: u32 },
}

/// Inline event consumer. Must be fast; it runs inside the emitting call.
#[async_trait]
pub trait DealEventHandler: Send + Sync {
    /// React to one event. Errors are the handler's to log; the bus does
    /// not fail the emitting transition.
    async fn handle(&self, event: &DealEvent);
}

/// In-process event bus for the lifecycle core.
pub struct DealEventBus {
    handlers: RwLock<Vec<Arc<dyn DealEventHandler>>>,
    tap: broadcast::Sender<DealEvent>,
    published: AtomicU64,
}

impl DealEventBus {
    /// Bus with the default observer capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Bus with an explicit observer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tap, _) = broadcast::channel(capacity);
        Self {
            handlers: RwLock::new(Vec::new()),
            tap,
            published: AtomicU64::new(0),
        }
    }

    /// Register an inline handler. Handlers run in registration order.
    pub fn register(&self, handler: Arc<dyn DealEventHandler>) {
        self.handlers.write().push(handler);
    }

    /// Subscribe as a detached observer.
    pub fn subscribe(&self) -> broadcast::Receiver<DealEvent> {
        self.tap.subscribe()
    }

    /// Publish an event: handlers first, then the observer tap.
    pub async fn publish(&self, event: DealEvent) {
        let handlers: Vec<_> = self.handlers.read().clone();
        for handler in handlers {
            handler.handle(&event).await;
        }
        // No observers is fine; broadcast returns Err then.
        let _ = self.tap.send(event.clone());
        let count = self.published.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(?event, published = count, "deal event published");
    }

    /// Total events published since construction.
    pub fn events_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for DealEventBus {
    fn default() -> Self {
        Self::new()
    }
}
