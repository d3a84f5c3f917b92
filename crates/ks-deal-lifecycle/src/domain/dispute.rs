//! The dispute aggregate. One per deal, at most.

use serde::{Deserialize, Serialize};
use shared_types::{DealId, TelegramId, TimestampMs};

use super::errors::DealError;

/// Hard cap on dispute comments.
pub const MAX_DISPUTE_COMMENTS: usize = 100;

/// Dispute lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    /// Opened by a participant, no arbiter involved yet.
    Open,
    /// An arbiter commented; the case is being reviewed.
    InReview,
    /// Closed, either by decision or by admin cancellation.
    Resolved,
}

/// Arbiter's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeDecision {
    RefundBuyer,
    ReleaseSeller,
}

impl DisputeDecision {
    /// Stable identifier for logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RefundBuyer => "refund_buyer",
            Self::ReleaseSeller => "release_seller",
        }
    }
}

/// A single dispute comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Author's Telegram id.
    pub author: TelegramId,
    /// Whether the author acted as arbiter.
    pub by_arbiter: bool,
    /// Comment body.
    pub text: String,
    /// When it was posted.
    pub at: TimestampMs,
}

/// Dispute over a deal. Referenced by deal id; unique per deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispute {
    /// The disputed deal.
    pub deal_id: DealId,
    /// Participant who opened the dispute.
    pub opener: TelegramId,
    /// Opener's stated reason.
    pub reason: String,
    /// Attached media references (file ids on the Telegram side).
    pub media: Vec<String>,
    /// Discussion thread, capped at [`MAX_DISPUTE_COMMENTS`].
    pub comments: Vec<Comment>,
    /// Current status.
    pub status: DisputeStatus,
    /// Verdict; set exactly when an arbiter resolves the case. Stays empty
    /// when an admin cancels the dispute instead.
    pub decision: Option<DisputeDecision>,
    /// Verdict queued while the payout submission keeps failing; promoted
    /// to `decision` by the retry worker on success.
    pub pending_decision: Option<DisputeDecision>,
    /// Arbiter who took the case.
    pub arbiter: Option<TelegramId>,
    /// When the dispute was opened.
    pub opened_at: TimestampMs,
    /// When it was resolved or cancelled.
    pub resolved_at: Option<TimestampMs>,
    /// True when an admin cancelled the dispute and reopened the deal.
    pub cancelled_by_admin: bool,
}

impl Dispute {
    /// Open a new dispute.
    pub fn new(
        deal_id: DealId,
        opener: TelegramId,
        reason: String,
        media: Vec<String>,
        now: TimestampMs,
    ) -> Self {
        Self {
            deal_id,
            opener,
            reason,
            media,
            comments: Vec::new(),
            status: DisputeStatus::Open,
            decision: None,
            pending_decision: None,
            arbiter: None,
            opened_at: now,
            resolved_at: None,
            cancelled_by_admin: false,
        }
    }

    /// Append a comment.
    ///
    /// The first arbiter comment moves the dispute into review. Returns
    /// `CommentLimit` once the cap is reached.
    pub fn add_comment(
        &mut self,
        author: TelegramId,
        by_arbiter: bool,
        text: String,
        now: TimestampMs,
    ) -> Result<(), DealError> {
        if self.status == DisputeStatus::Resolved {
            return Err(DealError::Conflict {
                deal_id: self.deal_id.clone(),
                status: super::status::DealStatus::Dispute,
                event: "comment on resolved dispute",
            });
        }
        if self.comments.len() >= MAX_DISPUTE_COMMENTS {
            return Err(DealError::CommentLimit {
                max: MAX_DISPUTE_COMMENTS,
            });
        }
        self.comments.push(Comment {
            author,
            by_arbiter,
            text,
            at: now,
        });
        if by_arbiter && self.status == DisputeStatus::Open {
            self.status = DisputeStatus::InReview;
            if self.arbiter.is_none() {
                self.arbiter = Some(author);
            }
        }
        Ok(())
    }

    /// Close with a verdict.
    pub fn resolve(&mut self, decision: DisputeDecision, arbiter: TelegramId, now: TimestampMs) {
        self.status = DisputeStatus::Resolved;
        self.decision = Some(decision);
        self.pending_decision = None;
        self.arbiter = Some(arbiter);
        self.resolved_at = Some(now);
    }

    /// Close without a verdict; the deal goes back to its working phase.
    pub fn cancel(&mut self, admin: TelegramId, now: TimestampMs) {
        self.status = DisputeStatus::Resolved;
        self.decision = None;
        self.pending_decision = None;
        self.cancelled_by_admin = true;
        self.arbiter = Some(admin);
        self.resolved_at = Some(now);
    }
}
