//! The user aggregate.

use serde::{Deserialize, Serialize};
use shared_types::{DealId, PlatformCode, TelegramId, TimestampMs, WalletAddress};

/// Losses in a row before the engine auto-blacklists.
pub const DISPUTE_LOSS_STREAK_LIMIT: u32 = 3;

/// Blacklist reason stamped by the auto-blacklist rule.
pub const BLACKLIST_REASON_DISPUTE_STREAK: &str = "dispute_streak";

/// Win/loss record across resolved disputes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeStats {
    /// Disputes resolved in this user's favor.
    pub won: u32,
    /// Disputes resolved against this user.
    pub lost: u32,
    /// Consecutive losses; reset by a win.
    pub loss_streak: u32,
}

/// A labelled wallet the user saved for reuse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedWallet {
    /// User-chosen label, e.g. "main".
    pub label: String,
    /// The address.
    pub address: WalletAddress,
}

/// A Telegram user known to the escrow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Telegram numeric id. Primary key.
    pub telegram_id: TelegramId,
    /// Telegram handle, without the `@`.
    pub handle: String,
    /// Dispute record.
    pub dispute_stats: DisputeStats,
    /// Banned from creating or joining deals.
    pub blacklisted: bool,
    /// Why, when blacklisted.
    pub blacklist_reason: Option<String>,
    /// Affiliate platform that sourced this user. Immutable once set.
    pub platform_code: Option<PlatformCode>,
    /// Saved wallets, in the order the user added them.
    pub saved_wallets: Vec<SavedWallet>,
    /// The user blocked the bot; notifications will bounce.
    pub bot_blocked: bool,
    /// Telegram chrome state, opaque to the lifecycle core.
    pub main_message_id: Option<i64>,
    /// The single active deal this user participates in, if any.
    pub active_deal_id: Option<DealId>,
    /// Last observed activity.
    pub last_activity: TimestampMs,
}

impl User {
    /// A fresh user with empty history.
    pub fn new(telegram_id: TelegramId, handle: impl Into<String>, now: TimestampMs) -> Self {
        Self {
            telegram_id,
            handle: handle.into(),
            dispute_stats: DisputeStats::default(),
            blacklisted: false,
            blacklist_reason: None,
            platform_code: None,
            saved_wallets: Vec::new(),
            bot_blocked: false,
            main_message_id: None,
            active_deal_id: None,
            last_activity: now,
        }
    }

    /// Record a dispute won; resets the loss streak.
    pub fn record_dispute_win(&mut self) {
        self.dispute_stats.won += 1;
        self.dispute_stats.loss_streak = 0;
    }

    /// Record a dispute lost. Returns `true` when the loss streak has
    /// reached the auto-blacklist limit.
    pub fn record_dispute_loss(&mut self) -> bool {
        self.dispute_stats.lost += 1;
        self.dispute_stats.loss_streak += 1;
        self.dispute_stats.loss_streak >= DISPUTE_LOSS_STREAK_LIMIT
    }

    /// Look up a saved wallet by its label.
    pub fn saved_wallet(&self, label: &str) -> Option<&SavedWallet> {
        self.saved_wallets.iter().find(|w| w.label == label)
    }

    /// Save a wallet, replacing any previous one with the same label.
    pub fn save_wallet(&mut self, label: impl Into<String>, address: WalletAddress) {
        let label = label.into();
        self.saved_wallets.retain(|w| w.label != label);
        self.saved_wallets.push(SavedWallet { label, address });
    }
}
