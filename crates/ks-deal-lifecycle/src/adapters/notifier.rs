//! Notification adapters.
//!
//! The real Telegram sender lives in the bot repository; the core ships
//! with a tracing sink for headless runs and a recording sink for
//! assertions in tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use shared_types::TelegramId;
use tracing::info;

use crate::ports::outbound::{NotificationKind, NotificationPort, NotifyError};

/// Logs every notification instead of delivering it.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationPort for TracingNotifier {
    async fn send(
        &self,
        user: TelegramId,
        kind: NotificationKind,
        payload: Value,
    ) -> Result<(), NotifyError> {
        info!(user = %user, kind = kind.as_str(), %payload, "notification");
        Ok(())
    }
}

/// Records notifications for test assertions; optionally fails on demand.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(TelegramId, NotificationKind, Value)>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far.
    pub fn sent(&self) -> Vec<(TelegramId, NotificationKind, Value)> {
        self.sent.lock().clone()
    }

    /// Notifications of one kind addressed to one user.
    pub fn sent_to(&self, user: TelegramId, kind: NotificationKind) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|(u, k, _)| *u == user && *k == kind)
            .count()
    }

    /// Make subsequent sends fail, to exercise the fire-and-forget path.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }
}

#[async_trait]
impl NotificationPort for RecordingNotifier {
    async fn send(
        &self,
        user: TelegramId,
        kind: NotificationKind,
        payload: Value,
    ) -> Result<(), NotifyError> {
        if *self.failing.lock() {
            return Err(NotifyError("bot blocked by user".into()));
        }
        self.sent.lock().push((user, kind, payload));
        Ok(())
    }
}
