//! Append-only audit records and the caller identity they attribute.

use serde::{Deserialize, Serialize};
use shared_types::{DealId, TelegramId, TimestampMs};
use uuid::Uuid;

/// Who is performing an operation against the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    /// A deal participant acting through the bot.
    User(TelegramId),
    /// Support staff with dispute and moderation powers.
    Admin(TelegramId),
    /// Operators allowed to force arbitrary transitions.
    Superadmin(TelegramId),
    /// Monitors and background workers.
    System,
}

impl Actor {
    /// Admin or above.
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin(_) | Self::Superadmin(_))
    }

    /// Superadmin only.
    pub fn is_superadmin(&self) -> bool {
        matches!(self, Self::Superadmin(_))
    }

    /// The Telegram id behind the actor, when there is one.
    pub fn user_id(&self) -> Option<TelegramId> {
        match self {
            Self::User(id) | Self::Admin(id) | Self::Superadmin(id) => Some(*id),
            Self::System => None,
        }
    }

    /// Stable label for logs and audit entries, e.g. `admin:42`.
    pub fn label(&self) -> String {
        match self {
            Self::User(id) => format!("user:{id}"),
            Self::Admin(id) => format!("admin:{id}"),
            Self::Superadmin(id) => format!("superadmin:{id}"),
            Self::System => "system".to_string(),
        }
    }
}

/// What an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    DealCreated,
    WalletAssigned,
    DepositLocked,
    DepositRejected,
    WorkStarted,
    WorkSubmitted,
    DealCompleted,
    DealCancelled,
    DealExpired,
    DisputeOpened,
    DisputeResolved,
    DisputeCancelled,
    ForcedTransition,
    UserBanned,
    UserUnbanned,
    DealHiddenToggled,
    PayoutRetryScheduled,
    PayoutRetryExhausted,
    FatalError,
}

/// One append-only audit record.
///
/// Entries for a single deal are written inside that deal's transition lock,
/// so their order matches the order of the transitions that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry id.
    pub id: Uuid,
    /// The deal this entry concerns, if any.
    pub deal_id: Option<DealId>,
    /// Who did it, as a stable label.
    pub actor: String,
    /// What happened.
    pub action: AuditAction,
    /// Action-specific payload.
    pub details: serde_json::Value,
    /// When it was recorded.
    pub at: TimestampMs,
}

impl AuditEntry {
    /// Build an entry with a fresh id.
    pub fn new(
        deal_id: Option<DealId>,
        actor: &Actor,
        action: AuditAction,
        details: serde_json::Value,
        at: TimestampMs,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            deal_id,
            actor: actor.label(),
            action,
            details,
            at,
        }
    }
}
