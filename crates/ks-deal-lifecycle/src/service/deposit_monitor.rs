//! Deposit monitor.
//!
//! Pure sink for the chain's deposit stream: correlates each deposit to the
//! deal funded through that multisig address, filters underpays and
//! unconfirmed transactions, deduplicates by `(deal, tx)` and drives the
//! `waiting_for_deposit → locked` transition. Delivery is at-least-once;
//! the engine's conditional write makes replays harmless.

use dashmap::DashSet;
use keyshield_telemetry::{DEPOSITS_OBSERVED, DEPOSITS_REJECTED};
use serde_json::json;
use shared_types::Clock;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{Actor, AuditAction, AuditEntry, DealError, DealStatus};
use crate::ports::inbound::DealLifecycleApi;
use crate::ports::outbound::{AuditSink, BlockchainPort, DealRepository, DepositEvent};

/// Dedup entries kept before the set is wholesale cleared. Replays past the
/// clear are still safe; the engine rejects them by status.
const DEDUP_CAPACITY: usize = 16_384;

/// Correlates chain deposits to waiting deals.
pub struct DepositMonitor {
    chain: Arc<dyn BlockchainPort>,
    deals: Arc<dyn DealRepository>,
    engine: Arc<dyn DealLifecycleApi>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    seen: DashSet<String>,
}

impl DepositMonitor {
    pub fn new(
        chain: Arc<dyn BlockchainPort>,
        deals: Arc<dyn DealRepository>,
        engine: Arc<dyn DealLifecycleApi>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            chain,
            deals,
            engine,
            audit,
            clock,
            seen: DashSet::new(),
        }
    }

    /// Handle one observed deposit.
    pub async fn on_deposit(&self, event: DepositEvent) {
        let deal = match self.deals.find_by_multisig(&event.address).await {
            Ok(Some(deal)) => deal,
            Ok(None) => {
                DEPOSITS_REJECTED.with_label_values(&["unknown_address"]).inc();
                debug!(address = %event.address, tx = %event.tx_hash, "deposit to unknown address");
                return;
            }
            Err(err) => {
                warn!(%err, "deal lookup failed; deposit will be retried by the chain feed");
                return;
            }
        };

        if deal.status != DealStatus::WaitingForDeposit {
            DEPOSITS_REJECTED.with_label_values(&["not_waiting"]).inc();
            debug!(deal_id = %deal.id, status = %deal.status, "deposit for non-waiting deal");
            return;
        }
        if event.confirmations < 1 {
            DEPOSITS_REJECTED.with_label_values(&["unconfirmed"]).inc();
            return;
        }

        let dedup_key = format!("{}:{}", deal.id, event.tx_hash);
        if self.seen.len() >= DEDUP_CAPACITY {
            self.seen.clear();
        }
        if !self.seen.insert(dedup_key) {
            debug!(deal_id = %deal.id, tx = %event.tx_hash, "duplicate deposit debounced");
            return;
        }

        if event.amount < deal.amount {
            DEPOSITS_REJECTED.with_label_values(&["insufficient"]).inc();
            let entry = AuditEntry::new(
                Some(deal.id.clone()),
                &Actor::System,
                AuditAction::DepositRejected,
                json!({
                    "tx": event.tx_hash,
                    "required": deal.amount,
                    "received": event.amount,
                }),
                self.clock.now_ms(),
            );
            if let Err(err) = self.audit.append(entry).await {
                warn!(%err, "audit append failed for rejected deposit");
            }
            info!(
                deal_id = %deal.id,
                required = %deal.amount,
                received = %event.amount,
                "deposit below deal amount; ignored"
            );
            return;
        }

        match self
            .engine
            .deposit_detected(&deal.id, event.tx_hash.clone(), event.amount, event.confirmations)
            .await
        {
            Ok(_) => {
                DEPOSITS_OBSERVED.inc();
                info!(deal_id = %deal.id, tx = %event.tx_hash, "deposit locked the deal");
            }
            // A concurrent event won; the transition already happened.
            Err(DealError::StaleState { .. }) | Err(DealError::Conflict { .. }) => {
                debug!(deal_id = %deal.id, "deposit raced another event; dropped");
            }
            Err(err) => {
                warn!(deal_id = %deal.id, %err, "deposit application failed");
            }
        }
    }

    /// Consume the chain's deposit stream until it closes.
    pub async fn run(self) {
        let mut stream = self.chain.deposit_stream();
        loop {
            match stream.recv().await {
                Ok(event) => self.on_deposit(event).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "deposit stream lagged; relying on chain replay");
                }
                Err(RecvError::Closed) => {
                    info!("deposit stream closed; monitor stopping");
                    return;
                }
            }
        }
    }

    /// Spawn onto the runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
