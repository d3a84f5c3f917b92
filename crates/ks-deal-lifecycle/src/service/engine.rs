//! The deal lifecycle engine.
//!
//! Every operation follows the same shape: acquire the per-deal mutex,
//! validate against the current state, perform the guarded effects, persist
//! through a conditional status write, record an audit entry, emit events
//! and fire notifications. The conditional write is the authority: a
//! failed CAS means the event was stale and the transition aborts with
//! `StaleState`, whatever the mutex said.
//!
//! Blockchain calls inside a transition are bounded by
//! `EngineConfig::blockchain_timeout`; on timeout the transition aborts
//! with no state change. Failed payout submissions are the one exception:
//! the settlement decision is already made, so the deal is flagged
//! `payout_pending` and handed to the retry worker instead of failing the
//! caller.

use async_trait::async_trait;
use keyshield_telemetry::{
    DEALS_CREATED, DEAL_TRANSITIONS, DISPUTES_OPENED, DISPUTES_RESOLVED, NOTIFICATIONS_FAILED,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use shared_types::{Clock, DealId, TelegramId, TimestampMs, TxHash, WalletAddress, HOUR_MS};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::domain::commission::{self, SettlementSplit};
use crate::domain::{
    Actor, AuditAction, AuditEntry, Deal, DealError, DealParams, DealStatus, Dispute,
    DisputeDecision, DisputeStatus, EnergyMethod, Role, StoreError, User, WorkSubmission,
    BLACKLIST_REASON_DISPUTE_STREAK,
};
use crate::events::{DealEvent, DealEventBus};
use crate::ports::inbound::{AdminApi, CreateDealRequest, DealLifecycleApi};
use crate::ports::outbound::{
    AuditSink, BlockchainPort, CounterStore, DealRepository, DisputeRepository, NotificationKind,
    NotificationPort, PayoutReceipt, PriceOracle, UserRepository,
};
use crate::service::locks::LockRegistry;
use crate::service::payout_retry::{PayoutJob, PayoutKind, PayoutQueue};

/// Counter name the deal ids are allocated from.
pub const DEAL_ID_COUNTER: &str = "deal_id";

/// Everything the engine depends on.
pub struct EngineDeps {
    pub clock: Arc<dyn Clock>,
    pub deals: Arc<dyn DealRepository>,
    pub users: Arc<dyn UserRepository>,
    pub disputes: Arc<dyn DisputeRepository>,
    pub counters: Arc<dyn CounterStore>,
    pub audit: Arc<dyn AuditSink>,
    pub chain: Arc<dyn BlockchainPort>,
    pub oracle: Arc<dyn PriceOracle>,
    pub notifier: Arc<dyn NotificationPort>,
    pub events: Arc<DealEventBus>,
}

/// The state machine. One per process; cheap to share behind an `Arc`.
pub struct DealLifecycleEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    deals: Arc<dyn DealRepository>,
    users: Arc<dyn UserRepository>,
    disputes: Arc<dyn DisputeRepository>,
    counters: Arc<dyn CounterStore>,
    audit_log: Arc<dyn AuditSink>,
    chain: Arc<dyn BlockchainPort>,
    oracle: Arc<dyn PriceOracle>,
    notifier: Arc<dyn NotificationPort>,
    events: Arc<DealEventBus>,
    locks: LockRegistry,
    payouts: PayoutQueue,
}

impl DealLifecycleEngine {
    pub fn new(config: EngineConfig, deps: EngineDeps, payouts: PayoutQueue) -> Self {
        Self {
            config,
            clock: deps.clock,
            deals: deps.deals,
            users: deps.users,
            disputes: deps.disputes,
            counters: deps.counters,
            audit_log: deps.audit,
            chain: deps.chain,
            oracle: deps.oracle,
            notifier: deps.notifier,
            events: deps.events,
            locks: LockRegistry::new(),
            payouts,
        }
    }

    /// The engine's configuration, for monitors that share its tunables.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    fn now(&self) -> TimestampMs {
        self.clock.now_ms()
    }

    /// Bound a blockchain call; a timeout aborts the transition with no
    /// state change.
    async fn bounded<T, F>(&self, call: F) -> Result<T, DealError>
    where
        F: Future<Output = Result<T, DealError>>,
    {
        match tokio::time::timeout(self.config.blockchain_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(DealError::BlockchainUnavailable(
                "blockchain call timed out".into(),
            )),
        }
    }

    async fn load_deal(&self, id: &DealId) -> Result<Deal, DealError> {
        self.deals
            .get(id)
            .await?
            .ok_or_else(|| DealError::DealNotFound(id.clone()))
    }

    async fn load_user(&self, id: TelegramId) -> Result<User, DealError> {
        self.users
            .get(id)
            .await?
            .ok_or(DealError::UserNotFound(id))
    }

    /// Persist a status transition through the repository CAS, after
    /// checking it against the legal-transition table. Forced admin moves
    /// go through [`Self::persist_forced`] instead.
    async fn persist_transition(
        &self,
        deal: &Deal,
        expected: DealStatus,
    ) -> Result<(), DealError> {
        if !expected.can_transition_to(deal.status) {
            return Err(DealError::Conflict {
                deal_id: deal.id.clone(),
                status: expected,
                event: "illegal transition",
            });
        }
        self.persist_forced(deal, expected).await
    }

    /// Conditional status write without the table check; superadmin-only
    /// paths may leave the table, the CAS still guards against races.
    async fn persist_forced(&self, deal: &Deal, expected: DealStatus) -> Result<(), DealError> {
        match self.deals.transition(deal, expected).await {
            Ok(()) => {
                DEAL_TRANSITIONS
                    .with_label_values(&[expected.as_str(), deal.status.as_str()])
                    .inc();
                info!(
                    deal_id = %deal.id,
                    from = expected.as_str(),
                    to = deal.status.as_str(),
                    "deal transition"
                );
                Ok(())
            }
            Err(StoreError::StatusConflict { actual }) => Err(DealError::StaleState {
                deal_id: deal.id.clone(),
                expected,
                actual,
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Best-effort audit append. The transition it describes is already
    /// persisted and authoritative; a failed append is logged, not raised.
    async fn record(
        &self,
        deal_id: Option<&DealId>,
        actor: &Actor,
        action: AuditAction,
        details: Value,
    ) {
        let entry = AuditEntry::new(deal_id.cloned(), actor, action, details, self.now());
        if let Err(err) = self.audit_log.append(entry).await {
            error!(%err, "audit append failed");
        }
    }

    /// Fire-and-forget notification; delivery is never awaited.
    fn notify(&self, user: TelegramId, kind: NotificationKind, payload: Value) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(err) = notifier.send(user, kind, payload).await {
                NOTIFICATIONS_FAILED.inc();
                warn!(user = %user, kind = kind.as_str(), %err, "notification failed");
            }
        });
    }

    fn notify_both(&self, deal: &Deal, kind: NotificationKind) {
        let payload = json!({ "deal_id": deal.id, "amount": deal.amount, "asset": deal.asset });
        self.notify(deal.buyer, kind, payload.clone());
        self.notify(deal.seller, kind, payload);
    }

    /// Undo an active-deal claim during create-deal compensation.
    async fn rollback_claim(&self, user: TelegramId, deal: &DealId) {
        if let Err(err) = self.users.release_active_deal(user, deal).await {
            error!(user = %user, deal_id = %deal, %err, "claim rollback failed");
        }
    }

    /// Release both participants' active-deal claims and announce the
    /// terminal transition. Call only after the terminal status persisted.
    async fn finish_terminal(&self, deal: &Deal) {
        for user in [deal.buyer, deal.seller] {
            if let Err(err) = self.users.release_active_deal(user, &deal.id).await {
                error!(deal_id = %deal.id, user = %user, %err, "active-deal release failed");
            }
        }
        self.events
            .publish(DealEvent::DealTerminated {
                deal_id: deal.id.clone(),
                platform: deal.platform_code.clone(),
                status: deal.status,
            })
            .await;
    }

    /// Stamp a successful payout onto the deal's cost record. Reads the
    /// price oracle exactly once, here.
    async fn apply_payout(&self, deal: &mut Deal, receipt: PayoutReceipt) {
        deal.payout_tx = Some(receipt.tx_hash);
        deal.costs.energy_method = Some(receipt.energy_method);
        match receipt.energy_method {
            EnergyMethod::Feesaver | EnergyMethod::Trx => {
                deal.costs.energy_trx += receipt.fee_trx;
            }
            EnergyMethod::None => {
                deal.costs.fallback_trx += self.config.fallback_energy_trx;
            }
        }
        deal.costs.trx_price_at_completion = Some(self.oracle.trx_price_usd().await);
        deal.payout_pending = false;
    }

    /// Flag the deal for the retry worker after a failed payout submission.
    async fn schedule_payout_retry(
        &self,
        deal: &mut Deal,
        dispute: Option<&mut Dispute>,
        kind: PayoutKind,
        cause: &DealError,
    ) -> Result<(), DealError> {
        deal.payout_pending = true;
        self.deals.update(deal).await?;
        if let Some(dispute) = dispute {
            self.disputes.update(dispute).await?;
        }
        self.record(
            Some(&deal.id),
            &Actor::System,
            AuditAction::PayoutRetryScheduled,
            json!({ "cause": cause.to_string() }),
        )
        .await;
        self.events
            .publish(DealEvent::PayoutRetryScheduled {
                deal_id: deal.id.clone(),
                attempt: 1,
            })
            .await;
        self.payouts.enqueue(PayoutJob {
            deal_id: deal.id.clone(),
            kind,
            attempt: 1,
            first_failed_at: self.now(),
        });
        warn!(deal_id = %deal.id, %cause, "payout submission failed; retry scheduled");
        Ok(())
    }

    // =========================================================================
    // Settlement paths (shared by the api calls and the retry worker)
    // =========================================================================

    /// Release the seller's payout and complete the deal. Requires
    /// `work_submitted`; chain errors propagate to the caller.
    async fn do_release_completion(
        &self,
        deal: &mut Deal,
        actor: &Actor,
        trigger: &'static str,
    ) -> Result<(), DealError> {
        let split = commission::release_split(deal.amount, deal.commission, deal.commission_payer);
        let multisig = required_wallet(deal.multisig_address.as_ref(), "multisig")?;
        let seller_wallet = required_wallet(deal.seller_address.as_ref(), "seller wallet")?;

        let receipt = self
            .bounded(self.chain.release(
                &multisig,
                &seller_wallet,
                split.release_to_seller,
                deal.asset,
            ))
            .await?;

        self.apply_payout(deal, receipt).await;
        deal.status = DealStatus::Completed;
        deal.completed_at = Some(self.now());
        self.persist_transition(deal, DealStatus::WorkSubmitted).await?;

        self.record(
            Some(&deal.id),
            actor,
            AuditAction::DealCompleted,
            settlement_details(trigger, &split, deal),
        )
        .await;
        self.finish_terminal(deal).await;
        self.notify_both(deal, NotificationKind::Completed);
        Ok(())
    }

    /// Settle a dispute with a verdict: pay out, close the dispute, update
    /// both participants' dispute records and auto-blacklist a loser on a
    /// streak. Requires `dispute`; chain errors propagate.
    async fn do_dispute_settlement(
        &self,
        deal: &mut Deal,
        dispute: &mut Dispute,
        decision: DisputeDecision,
        arbiter: TelegramId,
        actor: &Actor,
        reason: Option<&str>,
    ) -> Result<(), DealError> {
        let multisig = required_wallet(deal.multisig_address.as_ref(), "multisig")?;
        let split = match decision {
            DisputeDecision::RefundBuyer => commission::refund_split(deal.amount),
            DisputeDecision::ReleaseSeller => {
                commission::release_split(deal.amount, deal.commission, deal.commission_payer)
            }
        };

        let receipt = match decision {
            DisputeDecision::RefundBuyer => {
                let buyer_wallet = required_wallet(deal.buyer_address.as_ref(), "buyer wallet")?;
                self.bounded(self.chain.refund(
                    &multisig,
                    &buyer_wallet,
                    split.refund_to_buyer,
                    deal.asset,
                ))
                .await?
            }
            DisputeDecision::ReleaseSeller => {
                let seller_wallet =
                    required_wallet(deal.seller_address.as_ref(), "seller wallet")?;
                self.bounded(self.chain.release(
                    &multisig,
                    &seller_wallet,
                    split.release_to_seller,
                    deal.asset,
                ))
                .await?
            }
        };

        self.apply_payout(deal, receipt).await;
        deal.status = DealStatus::Resolved;
        deal.completed_at = Some(self.now());
        self.persist_transition(deal, DealStatus::Dispute).await?;

        dispute.resolve(decision, arbiter, self.now());
        self.disputes.update(dispute).await?;

        let (winner, loser) = match decision {
            DisputeDecision::RefundBuyer => (deal.buyer, deal.seller),
            DisputeDecision::ReleaseSeller => (deal.seller, deal.buyer),
        };
        self.apply_dispute_stats(winner, loser).await;

        self.record(
            Some(&deal.id),
            actor,
            AuditAction::DisputeResolved,
            json!({
                "decision": decision.as_str(),
                "reason": reason,
                "winner": winner,
                "loser": loser,
                "released": split.release_to_seller,
                "refunded": split.refund_to_buyer,
                "withheld": split.fee_withheld,
            }),
        )
        .await;
        DISPUTES_RESOLVED
            .with_label_values(&[decision.as_str()])
            .inc();
        self.events
            .publish(DealEvent::DisputeResolved {
                deal_id: deal.id.clone(),
                decision,
            })
            .await;
        self.finish_terminal(deal).await;
        self.notify_both(deal, NotificationKind::DisputeResolved);
        Ok(())
    }

    /// Update the winner's and loser's dispute records; blacklist the
    /// loser when their streak reaches the limit.
    async fn apply_dispute_stats(&self, winner: TelegramId, loser: TelegramId) {
        match self.load_user(winner).await {
            Ok(mut user) => {
                user.record_dispute_win();
                if let Err(err) = self.users.update(&user).await {
                    error!(user = %winner, %err, "dispute-win update failed");
                }
            }
            Err(err) => error!(user = %winner, %err, "winner load failed"),
        }
        match self.load_user(loser).await {
            Ok(mut user) => {
                let streak_tripped = user.record_dispute_loss();
                if streak_tripped && !user.blacklisted {
                    user.blacklisted = true;
                    user.blacklist_reason = Some(BLACKLIST_REASON_DISPUTE_STREAK.to_string());
                    self.record(
                        None,
                        &Actor::System,
                        AuditAction::UserBanned,
                        json!({
                            "user": loser,
                            "reason": BLACKLIST_REASON_DISPUTE_STREAK,
                            "loss_streak": user.dispute_stats.loss_streak,
                        }),
                    )
                    .await;
                    warn!(user = %loser, "auto-blacklisted after dispute loss streak");
                }
                if let Err(err) = self.users.update(&user).await {
                    error!(user = %loser, %err, "dispute-loss update failed");
                }
            }
            Err(err) => error!(user = %loser, %err, "loser load failed"),
        }
    }

    /// Refund the full deposit and force the deal to `refunded`. Used by
    /// the superadmin force-transition on funded deals; chain errors
    /// propagate.
    async fn do_admin_refund(
        &self,
        deal: &mut Deal,
        actor: &Actor,
        reason: &str,
    ) -> Result<(), DealError> {
        let from_status = deal.status;
        let multisig = required_wallet(deal.multisig_address.as_ref(), "multisig")?;
        let buyer_wallet = required_wallet(deal.buyer_address.as_ref(), "buyer wallet")?;
        let split = commission::refund_split(deal.amount);

        let receipt = self
            .bounded(
                self.chain
                    .refund(&multisig, &buyer_wallet, split.refund_to_buyer, deal.asset),
            )
            .await?;

        self.apply_payout(deal, receipt).await;
        deal.status = DealStatus::Refunded;
        deal.completed_at = Some(self.now());
        self.persist_forced(deal, from_status).await?;

        self.record(
            Some(&deal.id),
            actor,
            AuditAction::ForcedTransition,
            json!({
                "from": from_status.as_str(),
                "to": DealStatus::Refunded.as_str(),
                "reason": reason,
                "refunded": split.refund_to_buyer,
            }),
        )
        .await;
        self.finish_terminal(deal).await;
        self.notify_both(deal, NotificationKind::Cancelled);
        Ok(())
    }

    // =========================================================================
    // Retry worker entry points
    // =========================================================================

    /// Re-drive a pending settlement. Returns `Ok(false)` when the deal no
    /// longer needs it; chain errors propagate so the worker can requeue.
    pub async fn retry_payout(&self, job: &PayoutJob) -> Result<bool, DealError> {
        let _guard = self.locks.acquire(job.deal_id.as_str()).await;
        let mut deal = match self.deals.get(&job.deal_id).await? {
            Some(deal) => deal,
            None => return Ok(false),
        };
        if !deal.payout_pending || deal.status.is_terminal() {
            return Ok(false);
        }

        match job.kind {
            PayoutKind::Complete => {
                if deal.status != DealStatus::WorkSubmitted {
                    return Ok(false);
                }
                self.do_release_completion(&mut deal, &Actor::System, "payout_retry")
                    .await?;
            }
            PayoutKind::DisputeRelease | PayoutKind::DisputeRefund => {
                if deal.status != DealStatus::Dispute {
                    return Ok(false);
                }
                let mut dispute = self
                    .disputes
                    .get(&deal.id)
                    .await?
                    .ok_or_else(|| DealError::DisputeNotFound(deal.id.clone()))?;
                let decision = match dispute.pending_decision {
                    Some(decision) => decision,
                    None => return Ok(false),
                };
                let arbiter = dispute.arbiter.ok_or_else(|| {
                    DealError::InvariantViolation("pending decision without arbiter".into())
                })?;
                self.do_dispute_settlement(
                    &mut deal,
                    &mut dispute,
                    decision,
                    arbiter,
                    &Actor::System,
                    Some("payout_retry"),
                )
                .await?;
            }
            PayoutKind::AdminRefund => {
                self.do_admin_refund(&mut deal, &Actor::System, "payout_retry")
                    .await?;
            }
        }
        Ok(true)
    }

    /// Terminal failure of the retry loop; the deal keeps `payout_pending`
    /// until an admin force-transitions it.
    pub async fn payout_retries_exhausted(&self, job: &PayoutJob) {
        self.record(
            Some(&job.deal_id),
            &Actor::System,
            AuditAction::PayoutRetryExhausted,
            json!({ "attempts": job.attempt }),
        )
        .await;
    }

    /// Requeue retries for deals left `payout_pending` by a crash. Call
    /// once at startup, before the monitors begin.
    pub async fn recover_pending_payouts(&self) -> Result<usize, DealError> {
        let pending = self.deals.list_payout_pending().await?;
        let mut recovered = 0;
        for deal in pending {
            let kind = match deal.status {
                DealStatus::WorkSubmitted => PayoutKind::Complete,
                DealStatus::Dispute => match self.disputes.get(&deal.id).await? {
                    Some(dispute) => match dispute.pending_decision {
                        Some(DisputeDecision::RefundBuyer) => PayoutKind::DisputeRefund,
                        Some(DisputeDecision::ReleaseSeller) => PayoutKind::DisputeRelease,
                        None => continue,
                    },
                    None => continue,
                },
                _ => PayoutKind::AdminRefund,
            };
            self.payouts.enqueue(PayoutJob {
                deal_id: deal.id.clone(),
                kind,
                attempt: 1,
                first_failed_at: self.now(),
            });
            recovered += 1;
        }
        if recovered > 0 {
            info!(recovered, "pending payouts requeued after restart");
        }
        Ok(recovered)
    }
}

/// A wallet that must be present at this point of the lifecycle.
fn required_wallet(
    wallet: Option<&WalletAddress>,
    what: &str,
) -> Result<WalletAddress, DealError> {
    wallet
        .cloned()
        .ok_or_else(|| DealError::InvariantViolation(format!("{what} missing at settlement")))
}

fn settlement_details(trigger: &str, split: &SettlementSplit, deal: &Deal) -> Value {
    json!({
        "trigger": trigger,
        "released": split.release_to_seller,
        "refunded": split.refund_to_buyer,
        "withheld": split.fee_withheld,
        "payout_tx": deal.payout_tx,
        "total_trx_spent": deal.costs.total_trx(),
        "trx_price": deal.costs.trx_price_at_completion,
    })
}

#[async_trait]
impl DealLifecycleApi for DealLifecycleEngine {
    async fn create_deal(&self, request: CreateDealRequest) -> Result<Deal, DealError> {
        // Pre-conditions that need no locks.
        if request.creator == request.counterparty {
            return Err(DealError::InvariantViolation(
                "cannot open a deal with yourself".into(),
            ));
        }
        if request.amount < self.config.min_amount_usdt {
            return Err(DealError::InvariantViolation(format!(
                "amount below the {} USDT minimum",
                self.config.min_amount_usdt
            )));
        }
        if request.deadline_hours < self.config.min_deadline_hours
            || request.deadline_hours > self.config.max_deadline_hours
        {
            return Err(DealError::InvariantViolation(format!(
                "deadline must be between {} and {} hours",
                self.config.min_deadline_hours, self.config.max_deadline_hours
            )));
        }
        if request.product.trim().is_empty() {
            return Err(DealError::InvariantViolation("product name required".into()));
        }

        let creator = self.load_user(request.creator).await?;
        let counterparty = self.load_user(request.counterparty).await?;
        if creator.handle == counterparty.handle {
            return Err(DealError::InvariantViolation(
                "creator and counterparty handles must differ".into(),
            ));
        }
        for user in [&creator, &counterparty] {
            if user.blacklisted {
                return Err(DealError::UserBlacklisted {
                    user_id: user.telegram_id,
                });
            }
        }

        let (buyer, seller) = match request.creator_role {
            Role::Buyer => (request.creator, request.counterparty),
            Role::Seller => (request.counterparty, request.creator),
        };
        let now = self.now();
        let commission = commission::commission_for(request.amount);
        // Allocated before any persistence write; a wasted value on a
        // later failure is acceptable, recycling is not.
        let id = DealId::from_counter(self.counters.next_value(DEAL_ID_COUNTER).await?);

        let mut deal = Deal::new(DealParams {
            id: id.clone(),
            buyer,
            seller,
            creator_role: request.creator_role,
            product: request.product,
            description: request.description,
            amount: request.amount,
            asset: request.asset,
            commission,
            commission_payer: request.commission_payer,
            platform_code: creator.platform_code.clone(),
            deadline: now + request.deadline_hours * HOUR_MS,
            created_at: now,
        })?;

        let first_status = match (&request.creator_role, &request.creator_wallet) {
            (Role::Buyer, Some(wallet)) => {
                deal.set_wallet(Role::Buyer, wallet.clone());
                DealStatus::WaitingForSellerWallet
            }
            (Role::Seller, Some(wallet)) => {
                deal.set_wallet(Role::Seller, wallet.clone());
                DealStatus::WaitingForBuyerWallet
            }
            (Role::Buyer, None) => DealStatus::WaitingForBuyerWallet,
            (Role::Seller, None) => DealStatus::WaitingForBuyerWallet,
        };

        // Claim both active-deal slots; compensate on any failure so a
        // half-created deal never survives.
        match self.users.try_claim_active_deal(buyer, &id).await {
            Ok(()) => {}
            Err(StoreError::ActiveDealTaken) => {
                return Err(DealError::UserHasActiveDeal { user_id: buyer })
            }
            Err(err) => return Err(err.into()),
        }
        match self.users.try_claim_active_deal(seller, &id).await {
            Ok(()) => {}
            Err(StoreError::ActiveDealTaken) => {
                self.rollback_claim(buyer, &id).await;
                return Err(DealError::UserHasActiveDeal { user_id: seller });
            }
            Err(err) => {
                self.rollback_claim(buyer, &id).await;
                return Err(err.into());
            }
        }

        if let Err(err) = self.deals.insert(&deal).await {
            self.rollback_claim(buyer, &id).await;
            self.rollback_claim(seller, &id).await;
            return Err(err.into());
        }

        deal.status = first_status;
        if let Err(err) = self.persist_transition(&deal, DealStatus::Created).await {
            // The row exists in `created`; neutralize it and free the users.
            deal.status = DealStatus::Cancelled;
            deal.completed_at = Some(self.now());
            let _ = self.deals.transition(&deal, DealStatus::Created).await;
            self.rollback_claim(buyer, &id).await;
            self.rollback_claim(seller, &id).await;
            return Err(err);
        }

        DEALS_CREATED.inc();
        self.record(
            Some(&deal.id),
            &Actor::User(request.creator),
            AuditAction::DealCreated,
            json!({
                "buyer": buyer,
                "seller": seller,
                "amount": deal.amount,
                "asset": deal.asset,
                "commission": deal.commission,
                "deadline": deal.deadline,
            }),
        )
        .await;
        self.events
            .publish(DealEvent::DealCreated {
                deal_id: deal.id.clone(),
                buyer,
                seller,
                platform: deal.platform_code.clone(),
            })
            .await;
        self.notify_both(&deal, NotificationKind::DealCreated);
        Ok(deal)
    }

    async fn provide_wallet(
        &self,
        deal_id: &DealId,
        caller: TelegramId,
        address: WalletAddress,
    ) -> Result<Deal, DealError> {
        let _guard = self.locks.acquire(deal_id.as_str()).await;
        let mut deal = self.load_deal(deal_id).await?;

        let awaited_role = match deal.status {
            DealStatus::WaitingForSellerWallet => Role::Seller,
            DealStatus::WaitingForBuyerWallet => Role::Buyer,
            _ => {
                return Err(DealError::Conflict {
                    deal_id: deal.id.clone(),
                    status: deal.status,
                    event: "provide_wallet",
                })
            }
        };
        if deal.role_of(caller) != Some(awaited_role) {
            return Err(DealError::NotAuthorized(
                "only the awaited participant may provide a wallet",
            ));
        }

        self.bounded(self.chain.verify_wallet(&address)).await?;

        if let Some(other) = deal.wallet_of(awaited_role.other()) {
            if *other == address {
                return Err(DealError::InvariantViolation(
                    "buyer and seller wallets must differ".into(),
                ));
            }
        }

        let from_status = deal.status;
        deal.set_wallet(awaited_role, address.clone());

        if deal.wallets_complete() {
            let buyer_wallet = required_wallet(deal.buyer_address.as_ref(), "buyer wallet")?;
            let seller_wallet = required_wallet(deal.seller_address.as_ref(), "seller wallet")?;
            let multisig = self
                .bounded(self.chain.create_multisig(
                    &buyer_wallet,
                    &seller_wallet,
                    &self.config.service_wallet,
                ))
                .await?;
            deal.costs.activation_trx = multisig.activation_cost_trx;
            self.chain.subscribe_deposits(&multisig.address);
            deal.multisig_address = Some(multisig.address);
            deal.status = DealStatus::WaitingForDeposit;
        } else {
            deal.status = DealStatus::WaitingForSellerWallet;
        }

        self.persist_transition(&deal, from_status).await?;
        self.record(
            Some(&deal.id),
            &Actor::User(caller),
            AuditAction::WalletAssigned,
            json!({
                "role": awaited_role,
                "address": address,
                "multisig": deal.multisig_address,
            }),
        )
        .await;
        self.events
            .publish(DealEvent::WalletAssigned {
                deal_id: deal.id.clone(),
                role: awaited_role,
            })
            .await;
        Ok(deal)
    }

    async fn provide_saved_wallet(
        &self,
        deal_id: &DealId,
        caller: TelegramId,
        label: &str,
    ) -> Result<Deal, DealError> {
        let user = self.load_user(caller).await?;
        let wallet = user
            .saved_wallet(label)
            .ok_or_else(|| {
                DealError::InvariantViolation(format!("no saved wallet labelled '{label}'"))
            })?
            .address
            .clone();
        self.provide_wallet(deal_id, caller, wallet).await
    }

    async fn deposit_detected(
        &self,
        deal_id: &DealId,
        tx_hash: TxHash,
        amount: Decimal,
        confirmations: u32,
    ) -> Result<Deal, DealError> {
        let _guard = self.locks.acquire(deal_id.as_str()).await;
        let mut deal = self.load_deal(deal_id).await?;

        // Replays of the locking transaction are accepted silently; the
        // CAS below rejects everything else that raced us.
        if deal.status == DealStatus::Locked && deal.deposit_tx.as_ref() == Some(&tx_hash) {
            return Ok(deal);
        }
        if deal.status != DealStatus::WaitingForDeposit {
            return Err(DealError::Conflict {
                deal_id: deal.id.clone(),
                status: deal.status,
                event: "deposit_detected",
            });
        }
        if confirmations < 1 {
            return Err(DealError::InvariantViolation(
                "deposit not confirmed yet".into(),
            ));
        }
        if amount < deal.amount {
            self.record(
                Some(&deal.id),
                &Actor::System,
                AuditAction::DepositRejected,
                json!({ "tx": tx_hash, "required": deal.amount, "received": amount }),
            )
            .await;
            return Err(DealError::DepositInsufficient {
                required: deal.amount,
                received: amount,
            });
        }

        deal.deposit_tx = Some(tx_hash.clone());
        deal.status = DealStatus::Locked;
        self.persist_transition(&deal, DealStatus::WaitingForDeposit)
            .await?;

        self.record(
            Some(&deal.id),
            &Actor::System,
            AuditAction::DepositLocked,
            json!({ "tx": tx_hash, "amount": amount, "confirmations": confirmations }),
        )
        .await;
        self.events
            .publish(DealEvent::DepositLocked {
                deal_id: deal.id.clone(),
            })
            .await;
        self.notify_both(&deal, NotificationKind::DepositReceived);
        Ok(deal)
    }

    async fn start_work(&self, deal_id: &DealId, caller: TelegramId) -> Result<Deal, DealError> {
        let _guard = self.locks.acquire(deal_id.as_str()).await;
        let mut deal = self.load_deal(deal_id).await?;

        if deal.status != DealStatus::Locked {
            return Err(DealError::Conflict {
                deal_id: deal.id.clone(),
                status: deal.status,
                event: "start_work",
            });
        }
        if deal.role_of(caller) != Some(Role::Seller) {
            return Err(DealError::NotAuthorized("only the seller starts work"));
        }

        deal.status = DealStatus::InProgress;
        self.persist_transition(&deal, DealStatus::Locked).await?;
        self.record(
            Some(&deal.id),
            &Actor::User(caller),
            AuditAction::WorkStarted,
            json!({}),
        )
        .await;
        self.events
            .publish(DealEvent::WorkStarted {
                deal_id: deal.id.clone(),
            })
            .await;
        Ok(deal)
    }

    async fn submit_work(
        &self,
        deal_id: &DealId,
        caller: TelegramId,
        description: String,
    ) -> Result<Deal, DealError> {
        let _guard = self.locks.acquire(deal_id.as_str()).await;
        let mut deal = self.load_deal(deal_id).await?;

        if !matches!(deal.status, DealStatus::Locked | DealStatus::InProgress) {
            return Err(DealError::Conflict {
                deal_id: deal.id.clone(),
                status: deal.status,
                event: "submit_work",
            });
        }
        if deal.role_of(caller) != Some(Role::Seller) {
            return Err(DealError::NotAuthorized("only the seller submits work"));
        }

        let from_status = deal.status;
        deal.work = Some(WorkSubmission {
            description,
            submitted_at: self.now(),
        });
        deal.status = DealStatus::WorkSubmitted;
        self.persist_transition(&deal, from_status).await?;

        self.record(
            Some(&deal.id),
            &Actor::User(caller),
            AuditAction::WorkSubmitted,
            json!({}),
        )
        .await;
        self.events
            .publish(DealEvent::WorkSubmitted {
                deal_id: deal.id.clone(),
            })
            .await;
        self.notify(
            deal.buyer,
            NotificationKind::WorkSubmitted,
            json!({ "deal_id": deal.id }),
        );
        Ok(deal)
    }

    async fn confirm(&self, deal_id: &DealId, caller: TelegramId) -> Result<Deal, DealError> {
        let _guard = self.locks.acquire(deal_id.as_str()).await;
        let mut deal = self.load_deal(deal_id).await?;

        if deal.status != DealStatus::WorkSubmitted {
            return Err(DealError::Conflict {
                deal_id: deal.id.clone(),
                status: deal.status,
                event: "confirm",
            });
        }
        if deal.role_of(caller) != Some(Role::Buyer) {
            return Err(DealError::NotAuthorized("only the buyer confirms"));
        }
        // Settlement already decided; the retry worker owns the payout.
        if deal.payout_pending {
            return Ok(deal);
        }

        let actor = Actor::User(caller);
        match self
            .do_release_completion(&mut deal, &actor, "buyer_confirm")
            .await
        {
            Ok(()) => Ok(deal),
            Err(err @ DealError::BlockchainUnavailable(_)) => {
                self.schedule_payout_retry(&mut deal, None, PayoutKind::Complete, &err)
                    .await?;
                Ok(deal)
            }
            Err(err) => Err(err),
        }
    }

    async fn cancel(&self, deal_id: &DealId, actor: Actor) -> Result<Deal, DealError> {
        let _guard = self.locks.acquire(deal_id.as_str()).await;
        let mut deal = self.load_deal(deal_id).await?;

        if !deal.status.is_waiting() {
            return Err(DealError::Conflict {
                deal_id: deal.id.clone(),
                status: deal.status,
                event: "cancel",
            });
        }
        let authorized = actor.is_admin()
            || actor
                .user_id()
                .map(|id| deal.is_participant(id))
                .unwrap_or(false);
        if !authorized {
            return Err(DealError::NotAuthorized(
                "only a participant or an admin may cancel",
            ));
        }

        let from_status = deal.status;
        deal.status = DealStatus::Cancelled;
        deal.completed_at = Some(self.now());
        self.persist_transition(&deal, from_status).await?;

        self.record(
            Some(&deal.id),
            &actor,
            AuditAction::DealCancelled,
            json!({ "from": from_status.as_str() }),
        )
        .await;
        self.finish_terminal(&deal).await;
        self.notify_both(&deal, NotificationKind::Cancelled);
        Ok(deal)
    }

    async fn open_dispute(
        &self,
        deal_id: &DealId,
        caller: TelegramId,
        reason: String,
        media: Vec<String>,
    ) -> Result<Dispute, DealError> {
        let _guard = self.locks.acquire(deal_id.as_str()).await;
        let mut deal = self.load_deal(deal_id).await?;

        if deal.status == DealStatus::Dispute {
            return Err(DealError::DisputeAlreadyExists(deal.id.clone()));
        }
        if !matches!(
            deal.status,
            DealStatus::Locked | DealStatus::InProgress | DealStatus::WorkSubmitted
        ) {
            return Err(DealError::Conflict {
                deal_id: deal.id.clone(),
                status: deal.status,
                event: "open_dispute",
            });
        }
        if !deal.is_participant(caller) {
            return Err(DealError::NotAuthorized(
                "only a participant may open a dispute",
            ));
        }

        let dispute = Dispute::new(deal.id.clone(), caller, reason, media, self.now());
        match self.disputes.create(&dispute).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists(_)) => {
                return Err(DealError::DisputeAlreadyExists(deal.id.clone()))
            }
            Err(err) => return Err(err.into()),
        }

        let from_status = deal.status;
        deal.status = DealStatus::Dispute;
        if let Err(err) = self.persist_transition(&deal, from_status).await {
            // The dispute row must not outlive the failed transition.
            let _ = self.disputes.remove(&deal.id).await;
            return Err(err);
        }

        DISPUTES_OPENED.inc();
        self.record(
            Some(&deal.id),
            &Actor::User(caller),
            AuditAction::DisputeOpened,
            json!({ "opener": caller, "from": from_status.as_str() }),
        )
        .await;
        self.events
            .publish(DealEvent::DisputeOpened {
                deal_id: deal.id.clone(),
                opener: caller,
            })
            .await;
        self.notify_both(&deal, NotificationKind::DisputeOpened);
        Ok(dispute)
    }

    async fn deadline_expired(&self, deal_id: &DealId) -> Result<Option<Deal>, DealError> {
        let _guard = self.locks.acquire(deal_id.as_str()).await;
        let mut deal = self.load_deal(deal_id).await?;

        // Repeated expiry is a no-op once the deal left the waiting states.
        if !deal.status.is_waiting() {
            return Ok(None);
        }
        if self.now() < deal.deadline {
            return Ok(None);
        }

        let from_status = deal.status;
        deal.status = DealStatus::Expired;
        deal.completed_at = Some(self.now());
        self.persist_transition(&deal, from_status).await?;

        self.record(
            Some(&deal.id),
            &Actor::System,
            AuditAction::DealExpired,
            json!({ "from": from_status.as_str(), "deadline": deal.deadline }),
        )
        .await;
        self.finish_terminal(&deal).await;
        self.notify_both(&deal, NotificationKind::Expired);
        Ok(Some(deal))
    }

    async fn auto_release(&self, deal_id: &DealId) -> Result<Option<Deal>, DealError> {
        let _guard = self.locks.acquire(deal_id.as_str()).await;
        let mut deal = self.load_deal(deal_id).await?;

        if deal.status != DealStatus::WorkSubmitted || deal.payout_pending {
            return Ok(None);
        }
        if self.now() < deal.deadline + self.config.auto_release_window_ms {
            return Ok(None);
        }

        let actor = Actor::System;
        match self
            .do_release_completion(&mut deal, &actor, "auto_release")
            .await
        {
            Ok(()) => Ok(Some(deal)),
            Err(err @ DealError::BlockchainUnavailable(_)) => {
                self.schedule_payout_retry(&mut deal, None, PayoutKind::Complete, &err)
                    .await?;
                Ok(Some(deal))
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl AdminApi for DealLifecycleEngine {
    async fn resolve_dispute(
        &self,
        deal_id: &DealId,
        actor: Actor,
        decision: DisputeDecision,
        reason: String,
    ) -> Result<Deal, DealError> {
        if !actor.is_admin() {
            return Err(DealError::NotAuthorized("dispute resolution requires admin"));
        }
        let arbiter = actor
            .user_id()
            .ok_or(DealError::NotAuthorized("system cannot arbitrate"))?;

        let _guard = self.locks.acquire(deal_id.as_str()).await;
        let mut deal = self.load_deal(deal_id).await?;
        if deal.status != DealStatus::Dispute {
            return Err(DealError::Conflict {
                deal_id: deal.id.clone(),
                status: deal.status,
                event: "resolve_dispute",
            });
        }
        let mut dispute = self
            .disputes
            .get(&deal.id)
            .await?
            .ok_or_else(|| DealError::DisputeNotFound(deal.id.clone()))?;
        if dispute.status == DisputeStatus::Resolved {
            return Err(DealError::Conflict {
                deal_id: deal.id.clone(),
                status: deal.status,
                event: "resolve_dispute",
            });
        }
        // Verdict already queued; the retry worker owns the payout.
        if deal.payout_pending {
            return Ok(deal);
        }

        match self
            .do_dispute_settlement(
                &mut deal,
                &mut dispute,
                decision,
                arbiter,
                &actor,
                Some(&reason),
            )
            .await
        {
            Ok(()) => Ok(deal),
            Err(err @ DealError::BlockchainUnavailable(_)) => {
                dispute.pending_decision = Some(decision);
                dispute.arbiter = Some(arbiter);
                let kind = match decision {
                    DisputeDecision::RefundBuyer => PayoutKind::DisputeRefund,
                    DisputeDecision::ReleaseSeller => PayoutKind::DisputeRelease,
                };
                self.schedule_payout_retry(&mut deal, Some(&mut dispute), kind, &err)
                    .await?;
                Ok(deal)
            }
            Err(err) => Err(err),
        }
    }

    async fn cancel_dispute(
        &self,
        deal_id: &DealId,
        actor: Actor,
        new_deadline_hours: u64,
    ) -> Result<Deal, DealError> {
        if !actor.is_admin() {
            return Err(DealError::NotAuthorized(
                "dispute cancellation requires admin",
            ));
        }
        let admin = actor
            .user_id()
            .ok_or(DealError::NotAuthorized("system cannot cancel disputes"))?;
        if new_deadline_hours == 0 {
            return Err(DealError::InvariantViolation(
                "new deadline must be positive".into(),
            ));
        }

        let _guard = self.locks.acquire(deal_id.as_str()).await;
        let mut deal = self.load_deal(deal_id).await?;
        if deal.status != DealStatus::Dispute {
            return Err(DealError::Conflict {
                deal_id: deal.id.clone(),
                status: deal.status,
                event: "cancel_dispute",
            });
        }
        let mut dispute = self
            .disputes
            .get(&deal.id)
            .await?
            .ok_or_else(|| DealError::DisputeNotFound(deal.id.clone()))?;

        dispute.cancel(admin, self.now());
        deal.deadline = self.now() + new_deadline_hours * HOUR_MS;
        deal.status = DealStatus::Locked;
        self.persist_transition(&deal, DealStatus::Dispute).await?;
        self.disputes.update(&dispute).await?;

        self.record(
            Some(&deal.id),
            &actor,
            AuditAction::DisputeCancelled,
            json!({ "new_deadline": deal.deadline }),
        )
        .await;
        Ok(deal)
    }

    async fn force_status(
        &self,
        deal_id: &DealId,
        actor: Actor,
        target: DealStatus,
        reason: String,
    ) -> Result<Deal, DealError> {
        if !actor.is_superadmin() {
            return Err(DealError::NotAuthorized(
                "forced transitions require superadmin",
            ));
        }

        let _guard = self.locks.acquire(deal_id.as_str()).await;
        let mut deal = self.load_deal(deal_id).await?;
        if deal.status.is_terminal() || target == deal.status {
            return Err(DealError::Conflict {
                deal_id: deal.id.clone(),
                status: deal.status,
                event: "force_status",
            });
        }

        // A forced refund on a funded deal moves real money.
        if target == DealStatus::Refunded && deal.deposit_tx.is_some() {
            return match self.do_admin_refund(&mut deal, &actor, &reason).await {
                Ok(()) => Ok(deal),
                Err(err @ DealError::BlockchainUnavailable(_)) => {
                    self.schedule_payout_retry(&mut deal, None, PayoutKind::AdminRefund, &err)
                        .await?;
                    Ok(deal)
                }
                Err(err) => Err(err),
            };
        }

        let from_status = deal.status;
        deal.status = target;
        if target.is_terminal() {
            deal.completed_at = Some(self.now());
        }
        self.persist_forced(&deal, from_status).await?;

        self.record(
            Some(&deal.id),
            &actor,
            AuditAction::ForcedTransition,
            json!({ "from": from_status.as_str(), "to": target.as_str(), "reason": reason }),
        )
        .await;
        if target.is_terminal() {
            self.finish_terminal(&deal).await;
        }
        Ok(deal)
    }

    async fn ban_user(
        &self,
        actor: Actor,
        user: TelegramId,
        reason: String,
    ) -> Result<(), DealError> {
        if !actor.is_admin() {
            return Err(DealError::NotAuthorized("banning requires admin"));
        }
        let mut target = self.load_user(user).await?;
        target.blacklisted = true;
        target.blacklist_reason = Some(reason.clone());
        self.users.update(&target).await?;
        self.record(
            None,
            &actor,
            AuditAction::UserBanned,
            json!({ "user": user, "reason": reason }),
        )
        .await;
        Ok(())
    }

    async fn unban_user(&self, actor: Actor, user: TelegramId) -> Result<(), DealError> {
        if !actor.is_admin() {
            return Err(DealError::NotAuthorized("unbanning requires admin"));
        }
        let mut target = self.load_user(user).await?;
        target.blacklisted = false;
        target.blacklist_reason = None;
        self.users.update(&target).await?;
        self.record(None, &actor, AuditAction::UserUnbanned, json!({ "user": user }))
            .await;
        Ok(())
    }

    async fn toggle_deal_hidden(
        &self,
        actor: Actor,
        deal_id: &DealId,
    ) -> Result<Deal, DealError> {
        if !actor.is_admin() {
            return Err(DealError::NotAuthorized("hiding deals requires admin"));
        }
        let _guard = self.locks.acquire(deal_id.as_str()).await;
        let mut deal = self.load_deal(deal_id).await?;
        deal.hidden = !deal.hidden;
        self.deals.update(&deal).await?;
        self.record(
            Some(&deal.id),
            &actor,
            AuditAction::DealHiddenToggled,
            json!({ "hidden": deal.hidden }),
        )
        .await;
        Ok(deal)
    }
}
