//! Background payout retry.
//!
//! A failed release/refund submission never fails the user-facing call:
//! the deal is flagged `payout_pending` and a job lands here. The worker
//! re-drives the full settlement with exponential backoff until it succeeds,
//! the policy is exhausted, or an admin force-transitions the deal.

use keyshield_telemetry::PAYOUT_RETRIES;
use shared_types::{Clock, DealId, TimestampMs};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::PayoutRetryPolicy;
use crate::service::engine::DealLifecycleEngine;

/// Which settlement the failed payout belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutKind {
    /// Buyer confirmation or auto-release.
    Complete,
    /// Dispute decided for the seller.
    DisputeRelease,
    /// Dispute decided for the buyer.
    DisputeRefund,
    /// Admin-forced refund.
    AdminRefund,
}

/// One queued payout retry.
#[derive(Debug, Clone)]
pub struct PayoutJob {
    /// The deal whose payout failed.
    pub deal_id: DealId,
    /// Which settlement to re-drive.
    pub kind: PayoutKind,
    /// Retry attempt about to run, starting at 1.
    pub attempt: u32,
    /// When the first submission failed; bounds the retry horizon.
    pub first_failed_at: TimestampMs,
}

/// Sending half of the retry queue, held by the engine.
#[derive(Clone)]
pub struct PayoutQueue {
    tx: mpsc::UnboundedSender<PayoutJob>,
}

impl PayoutQueue {
    /// Create the queue; the receiver goes to the worker.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PayoutJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue a retry. Failure means the worker is gone, which only
    /// happens during shutdown; the deal stays `payout_pending` and crash
    /// recovery picks it up on the next start.
    pub fn enqueue(&self, job: PayoutJob) {
        if let Err(err) = self.tx.send(job) {
            warn!(%err, "payout retry queue closed; job dropped until restart");
        }
    }
}

/// The retry worker. One per process.
pub struct PayoutRetryWorker {
    engine: Arc<DealLifecycleEngine>,
    rx: mpsc::UnboundedReceiver<PayoutJob>,
    queue: PayoutQueue,
    policy: PayoutRetryPolicy,
    clock: Arc<dyn Clock>,
}

impl PayoutRetryWorker {
    pub fn new(
        engine: Arc<DealLifecycleEngine>,
        rx: mpsc::UnboundedReceiver<PayoutJob>,
        queue: PayoutQueue,
        policy: PayoutRetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine,
            rx,
            queue,
            policy,
            clock,
        }
    }

    /// Run until the queue closes.
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            tokio::time::sleep(backoff(&self.policy, job.attempt)).await;

            match self.engine.retry_payout(&job).await {
                Ok(true) => {
                    PAYOUT_RETRIES.with_label_values(&["success"]).inc();
                    info!(deal_id = %job.deal_id, attempt = job.attempt, "payout retry succeeded");
                }
                Ok(false) => {
                    // Settled or force-transitioned while we slept.
                    info!(deal_id = %job.deal_id, "payout no longer pending; retry dropped");
                }
                Err(err) => {
                    PAYOUT_RETRIES.with_label_values(&["failure"]).inc();
                    let elapsed = self.clock.now_ms().saturating_sub(job.first_failed_at);
                    let next_attempt = job.attempt + 1;
                    if next_attempt <= self.policy.max_attempts
                        && elapsed < self.policy.horizon_ms
                    {
                        warn!(
                            deal_id = %job.deal_id,
                            attempt = job.attempt,
                            %err,
                            "payout retry failed; requeueing"
                        );
                        self.queue.enqueue(PayoutJob {
                            attempt: next_attempt,
                            ..job
                        });
                    } else {
                        PAYOUT_RETRIES.with_label_values(&["exhausted"]).inc();
                        error!(
                            deal_id = %job.deal_id,
                            attempts = job.attempt,
                            %err,
                            "payout retries exhausted; admin intervention required"
                        );
                        self.engine.payout_retries_exhausted(&job).await;
                    }
                }
            }
        }
    }

    /// Spawn onto the runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

/// Backoff before the given attempt: doubles per attempt, capped.
fn backoff(policy: &PayoutRetryPolicy, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    policy
        .initial_backoff
        .saturating_mul(1u32 << shift)
        .min(policy.max_backoff)
}
