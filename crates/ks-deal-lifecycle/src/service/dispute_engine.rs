//! The dispute conversation engine.
//!
//! Owns the comment thread and the `open → in_review` move; verdicts are
//! money-moving and therefore delegated to the lifecycle engine's admin
//! surface. Comments are capped; the cap lives in the domain type.

use async_trait::async_trait;
use shared_types::{Clock, DealId};
use std::sync::Arc;
use tracing::debug;

use crate::domain::{Actor, DealError, Dispute};
use crate::ports::inbound::DisputeApi;
use crate::ports::outbound::DisputeRepository;
use crate::service::locks::LockRegistry;

/// Comment and review handling for disputes.
pub struct DisputeEngine {
    disputes: Arc<dyn DisputeRepository>,
    clock: Arc<dyn Clock>,
    locks: LockRegistry,
}

impl DisputeEngine {
    pub fn new(disputes: Arc<dyn DisputeRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            disputes,
            clock,
            locks: LockRegistry::new(),
        }
    }

    async fn load(&self, deal_id: &DealId) -> Result<Dispute, DealError> {
        self.disputes
            .get(deal_id)
            .await?
            .ok_or_else(|| DealError::DisputeNotFound(deal_id.clone()))
    }
}

#[async_trait]
impl DisputeApi for DisputeEngine {
    async fn get_dispute(&self, deal_id: &DealId) -> Result<Dispute, DealError> {
        self.load(deal_id).await
    }

    async fn add_comment(
        &self,
        deal_id: &DealId,
        actor: Actor,
        text: String,
    ) -> Result<Dispute, DealError> {
        let author = actor
            .user_id()
            .ok_or(DealError::NotAuthorized("system does not comment"))?;

        let _guard = self.locks.acquire(deal_id.as_str()).await;
        let mut dispute = self.load(deal_id).await?;
        let was_open = dispute.status == crate::domain::DisputeStatus::Open;

        dispute.add_comment(author, actor.is_admin(), text, self.clock.now_ms())?;
        self.disputes.update(&dispute).await?;

        if was_open && dispute.status == crate::domain::DisputeStatus::InReview {
            debug!(deal_id = %deal_id, arbiter = %author, "dispute moved to review");
        }
        Ok(dispute)
    }
}
