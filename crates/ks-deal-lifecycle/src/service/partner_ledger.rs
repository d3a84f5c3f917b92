//! Partner accounting.
//!
//! [`PartnerLedger::recompute`] is a pure aggregation over the settled deals
//! of one platform; the denormalized stats block on the platform document is
//! a cache of its result. Stats writes are single-writer per platform via a
//! platform-keyed mutex; reads stay lock-free.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use shared_types::PlatformCode;
use std::sync::Arc;
use tracing::{error, info};

use crate::domain::{DealError, DealStatus, PlatformStats};
use crate::events::{DealEvent, DealEventHandler};
use crate::ports::inbound::{DealFilter, PartnerApi};
use crate::ports::outbound::{DealRepository, PlatformRepository, UserRepository};
use crate::service::locks::LockRegistry;
use crate::Deal;

/// Recomputes and persists denormalized platform stats.
pub struct PartnerLedger {
    deals: Arc<dyn DealRepository>,
    users: Arc<dyn UserRepository>,
    platforms: Arc<dyn PlatformRepository>,
    locks: LockRegistry,
}

impl PartnerLedger {
    pub fn new(
        deals: Arc<dyn DealRepository>,
        users: Arc<dyn UserRepository>,
        platforms: Arc<dyn PlatformRepository>,
    ) -> Self {
        Self {
            deals,
            users,
            platforms,
            locks: LockRegistry::new(),
        }
    }

    /// Recompute one platform's stats from scratch and persist them.
    ///
    /// Idempotent: safe to call at any time, concurrently with transitions.
    /// Only deals that settled (completed or resolved) count.
    pub async fn recompute(&self, code: &PlatformCode) -> Result<PlatformStats, DealError> {
        let _guard = self.locks.acquire(code.as_str()).await;

        let mut platform = self
            .platforms
            .get(code)
            .await?
            .ok_or_else(|| DealError::PlatformNotFound(code.clone()))?;

        let all = self
            .deals
            .list_by_platform(
                code,
                &DealFilter {
                    status: None,
                    include_hidden: true,
                },
            )
            .await?;
        let settled: Vec<&Deal> = all
            .iter()
            .filter(|d| matches!(d.status, DealStatus::Completed | DealStatus::Resolved))
            .collect();

        let mut stats = PlatformStats {
            users: self.users.count_by_platform(code).await?,
            deals: settled.len() as u64,
            ..PlatformStats::default()
        };

        for deal in settled {
            stats.total_volume += deal.amount;
            stats.total_commission += deal.commission;
            let trx = deal.costs.total_trx();
            stats.total_trx_spent += trx;
            // Priced per deal at its own completion-time rate, never
            // re-priced at today's rate.
            if let Some(usd) = deal.costs.total_usd() {
                stats.total_trx_spent_usdt += usd;
            }
        }

        stats.net_profit = stats.total_commission - stats.total_trx_spent_usdt;
        stats.payout =
            (stats.net_profit * platform.commission_percent / dec!(100)).max(Decimal::ZERO);
        stats.platform_pure_profit = stats.net_profit - stats.payout;

        platform.stats = stats.clone();
        self.platforms.update(&platform).await?;

        info!(
            platform = %code,
            deals = stats.deals,
            volume = %stats.total_volume,
            net_profit = %stats.net_profit,
            "partner ledger recomputed"
        );

        Ok(stats)
    }
}

/// Inline event handler that recomputes the ledger whenever a
/// platform-affiliated deal terminates.
pub struct LedgerRecomputeHandler {
    ledger: Arc<PartnerLedger>,
}

impl LedgerRecomputeHandler {
    pub fn new(ledger: Arc<PartnerLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl DealEventHandler for LedgerRecomputeHandler {
    async fn handle(&self, event: &DealEvent) {
        if let DealEvent::DealTerminated {
            deal_id,
            platform: Some(code),
            ..
        } = event
        {
            if let Err(err) = self.ledger.recompute(code).await {
                error!(deal_id = %deal_id, platform = %code, %err, "ledger recompute failed");
            }
        }
    }
}

/// Read-only partner portal surface.
pub struct PartnerService {
    deals: Arc<dyn DealRepository>,
    platforms: Arc<dyn PlatformRepository>,
}

impl PartnerService {
    pub fn new(deals: Arc<dyn DealRepository>, platforms: Arc<dyn PlatformRepository>) -> Self {
        Self { deals, platforms }
    }
}

#[async_trait]
impl PartnerApi for PartnerService {
    async fn get_stats(&self, code: &PlatformCode) -> Result<PlatformStats, DealError> {
        let platform = self
            .platforms
            .get(code)
            .await?
            .ok_or_else(|| DealError::PlatformNotFound(code.clone()))?;
        Ok(platform.stats)
    }

    async fn list_deals(
        &self,
        code: &PlatformCode,
        filter: DealFilter,
    ) -> Result<Vec<Deal>, DealError> {
        // Partner reads never see hidden deals, whatever the filter says.
        let filter = DealFilter {
            include_hidden: false,
            ..filter
        };
        Ok(self.deals.list_by_platform(code, &filter).await?)
    }
}
