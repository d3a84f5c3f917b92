//! Deadline monitor.
//!
//! Periodic sweep over deals whose deadline is near or past. Three duties:
//! expire funding deals past their deadline, auto-release submitted work the
//! buyer sat on through the acceptance window, and send a single warning
//! notification shortly before a funding deadline hits.
//!
//! Crash-tolerant by construction: nothing is remembered between ticks
//! except the warning dedup, and every action re-checks state through the
//! engine, so a missed or repeated tick cannot corrupt a deal.

use dashmap::DashSet;
use serde_json::json;
use shared_types::Clock;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::ports::inbound::DealLifecycleApi;
use crate::ports::outbound::{DealRepository, NotificationKind, NotificationPort};
use crate::DealStatus;

/// Sweeps deadlines on a fixed period.
pub struct DeadlineMonitor {
    deals: Arc<dyn DealRepository>,
    engine: Arc<dyn DealLifecycleApi>,
    notifier: Arc<dyn NotificationPort>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    warned: DashSet<String>,
}

impl DeadlineMonitor {
    pub fn new(
        deals: Arc<dyn DealRepository>,
        engine: Arc<dyn DealLifecycleApi>,
        notifier: Arc<dyn NotificationPort>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            deals,
            engine,
            notifier,
            clock,
            config,
            warned: DashSet::new(),
        }
    }

    /// One sweep. Public so tests can tick deterministically.
    pub async fn sweep(&self) {
        let now = self.clock.now_ms();
        let horizon = now + self.config.deadline_warning_ms;

        let due = match self.deals.with_deadline_before(horizon).await {
            Ok(due) => due,
            Err(err) => {
                warn!(%err, "deadline sweep query failed");
                return;
            }
        };

        for deal in due {
            match deal.status {
                status if status.is_waiting() => {
                    if now >= deal.deadline {
                        match self.engine.deadline_expired(&deal.id).await {
                            Ok(Some(_)) => info!(deal_id = %deal.id, "deal expired"),
                            Ok(None) => debug!(deal_id = %deal.id, "expiry was a no-op"),
                            Err(err) => warn!(deal_id = %deal.id, %err, "expiry failed"),
                        }
                    } else if self.warned.insert(deal.id.as_str().to_string()) {
                        let payload = json!({ "deal_id": deal.id, "deadline": deal.deadline });
                        for user in [deal.buyer, deal.seller] {
                            if let Err(err) = self
                                .notifier
                                .send(user, NotificationKind::DeadlineWarning, payload.clone())
                                .await
                            {
                                warn!(user = %user, %err, "deadline warning failed");
                            }
                        }
                    }
                }
                DealStatus::WorkSubmitted => {
                    if now >= deal.deadline + self.config.auto_release_window_ms {
                        match self.engine.auto_release(&deal.id).await {
                            Ok(Some(_)) => {
                                info!(deal_id = %deal.id, "work auto-released after silence")
                            }
                            Ok(None) => debug!(deal_id = %deal.id, "auto-release was a no-op"),
                            Err(err) => warn!(deal_id = %deal.id, %err, "auto-release failed"),
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Sweep forever on the configured period.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.config.sweep_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    /// Spawn onto the runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
