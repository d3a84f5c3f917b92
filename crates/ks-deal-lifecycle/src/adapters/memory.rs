//! In-memory document store.
//!
//! Backs every repository trait with `DashMap` collections. The conditional
//! writes (`transition`, `try_claim_active_deal`) rely on DashMap's
//! per-entry locking, so their semantics match the durable adapter exactly.
//! Used by the test suite and the dev-mode runtime.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use shared_types::{Clock, DealId, PlatformCode, TelegramId, TimestampMs, WalletAddress};
use std::sync::Arc;

use crate::domain::{
    AuditEntry, Deal, DealStatus, Dispute, DisputeStatus, Platform, SessionKind, StoreError, User,
};
use crate::ports::inbound::DealFilter;
use crate::ports::outbound::{
    AuditSink, CounterStore, DealRepository, DisputeRepository, PlatformRepository, SessionStore,
    UserRepository,
};

#[derive(Clone)]
struct SessionRecord {
    value: Value,
    expires_at: TimestampMs,
}

/// Every collection of the document store, in memory.
pub struct MemoryStore {
    deals: DashMap<String, Deal>,
    deals_by_multisig: DashMap<String, DealId>,
    users: DashMap<TelegramId, User>,
    disputes: DashMap<String, Dispute>,
    platforms: DashMap<String, Platform>,
    counters: DashMap<String, u64>,
    audit: Mutex<Vec<AuditEntry>>,
    sessions: DashMap<String, SessionRecord>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            deals: DashMap::new(),
            deals_by_multisig: DashMap::new(),
            users: DashMap::new(),
            disputes: DashMap::new(),
            platforms: DashMap::new(),
            counters: DashMap::new(),
            audit: Mutex::new(Vec::new()),
            sessions: DashMap::new(),
            clock,
        }
    }

    fn index_multisig(&self, deal: &Deal) {
        if let Some(address) = &deal.multisig_address {
            self.deals_by_multisig
                .insert(address.as_str().to_string(), deal.id.clone());
        }
    }

    fn session_key(user: TelegramId, kind: SessionKind) -> String {
        format!("{user}:{}", kind.as_str())
    }

    /// Every audit entry, in append order. Test inspection helper.
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit.lock().clone()
    }
}

#[async_trait]
impl DealRepository for MemoryStore {
    async fn insert(&self, deal: &Deal) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;
        match self.deals.entry(deal.id.as_str().to_string()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(deal.id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(deal.clone());
                self.index_multisig(deal);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &DealId) -> Result<Option<Deal>, StoreError> {
        Ok(self.deals.get(id.as_str()).map(|d| d.clone()))
    }

    async fn update(&self, deal: &Deal) -> Result<(), StoreError> {
        match self.deals.get_mut(deal.id.as_str()) {
            Some(mut slot) => {
                *slot = deal.clone();
                drop(slot);
                self.index_multisig(deal);
                Ok(())
            }
            None => Err(StoreError::NotFound(deal.id.to_string())),
        }
    }

    async fn transition(&self, deal: &Deal, expected: DealStatus) -> Result<(), StoreError> {
        // The entry guard holds the shard lock, making check-and-swap atomic.
        match self.deals.get_mut(deal.id.as_str()) {
            Some(mut slot) => {
                if slot.status != expected {
                    return Err(StoreError::StatusConflict {
                        actual: slot.status,
                    });
                }
                *slot = deal.clone();
                drop(slot);
                self.index_multisig(deal);
                Ok(())
            }
            None => Err(StoreError::NotFound(deal.id.to_string())),
        }
    }

    async fn find_by_multisig(
        &self,
        address: &WalletAddress,
    ) -> Result<Option<Deal>, StoreError> {
        let Some(id) = self
            .deals_by_multisig
            .get(address.as_str())
            .map(|id| id.clone())
        else {
            return Ok(None);
        };
        Ok(self.deals.get(id.as_str()).map(|d| d.clone()))
    }

    async fn with_deadline_before(&self, cutoff: TimestampMs) -> Result<Vec<Deal>, StoreError> {
        Ok(self
            .deals
            .iter()
            .filter(|entry| !entry.status.is_terminal() && entry.deadline <= cutoff)
            .map(|entry| entry.clone())
            .collect())
    }

    async fn list_payout_pending(&self) -> Result<Vec<Deal>, StoreError> {
        Ok(self
            .deals
            .iter()
            .filter(|entry| entry.payout_pending && !entry.status.is_terminal())
            .map(|entry| entry.clone())
            .collect())
    }

    async fn list_by_platform(
        &self,
        code: &PlatformCode,
        filter: &DealFilter,
    ) -> Result<Vec<Deal>, StoreError> {
        let mut deals: Vec<Deal> = self
            .deals
            .iter()
            .filter(|entry| entry.platform_code.as_ref() == Some(code))
            .filter(|entry| filter.status.map_or(true, |s| entry.status == s))
            .filter(|entry| filter.include_hidden || !entry.hidden)
            .map(|entry| entry.clone())
            .collect();
        deals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deals)
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;
        match self.users.entry(user.telegram_id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(user.telegram_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(user.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: TelegramId) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        match self.users.get_mut(&user.telegram_id) {
            Some(mut slot) => {
                // The active-deal slot is owned by the conditional ops below;
                // a plain update must never clobber it.
                let active = slot.active_deal_id.clone();
                *slot = user.clone();
                slot.active_deal_id = active;
                Ok(())
            }
            None => Err(StoreError::NotFound(user.telegram_id.to_string())),
        }
    }

    async fn try_claim_active_deal(
        &self,
        user: TelegramId,
        deal: &DealId,
    ) -> Result<(), StoreError> {
        match self.users.get_mut(&user) {
            Some(mut slot) => match &slot.active_deal_id {
                Some(current) if current == deal => Ok(()),
                Some(_) => Err(StoreError::ActiveDealTaken),
                None => {
                    slot.active_deal_id = Some(deal.clone());
                    Ok(())
                }
            },
            None => Err(StoreError::NotFound(user.to_string())),
        }
    }

    async fn release_active_deal(
        &self,
        user: TelegramId,
        deal: &DealId,
    ) -> Result<(), StoreError> {
        if let Some(mut slot) = self.users.get_mut(&user) {
            if slot.active_deal_id.as_ref() == Some(deal) {
                slot.active_deal_id = None;
            }
        }
        Ok(())
    }

    async fn count_by_platform(&self, code: &PlatformCode) -> Result<u64, StoreError> {
        Ok(self
            .users
            .iter()
            .filter(|entry| entry.platform_code.as_ref() == Some(code))
            .count() as u64)
    }
}

#[async_trait]
impl DisputeRepository for MemoryStore {
    async fn create(&self, dispute: &Dispute) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;
        match self.disputes.entry(dispute.deal_id.as_str().to_string()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(dispute.deal_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(dispute.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, deal_id: &DealId) -> Result<Option<Dispute>, StoreError> {
        Ok(self.disputes.get(deal_id.as_str()).map(|d| d.clone()))
    }

    async fn update(&self, dispute: &Dispute) -> Result<(), StoreError> {
        match self.disputes.get_mut(dispute.deal_id.as_str()) {
            Some(mut slot) => {
                *slot = dispute.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(dispute.deal_id.to_string())),
        }
    }

    async fn remove(&self, deal_id: &DealId) -> Result<(), StoreError> {
        self.disputes.remove(deal_id.as_str());
        Ok(())
    }

    async fn list_unresolved(&self) -> Result<Vec<Dispute>, StoreError> {
        Ok(self
            .disputes
            .iter()
            .filter(|entry| entry.status != DisputeStatus::Resolved)
            .map(|entry| entry.clone())
            .collect())
    }
}

#[async_trait]
impl PlatformRepository for MemoryStore {
    async fn insert(&self, platform: &Platform) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;
        match self.platforms.entry(platform.code.as_str().to_string()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(platform.code.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(platform.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, code: &PlatformCode) -> Result<Option<Platform>, StoreError> {
        Ok(self.platforms.get(code.as_str()).map(|p| p.clone()))
    }

    async fn update(&self, platform: &Platform) -> Result<(), StoreError> {
        match self.platforms.get_mut(platform.code.as_str()) {
            Some(mut slot) => {
                *slot = platform.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(platform.code.to_string())),
        }
    }

    async fn list(&self) -> Result<Vec<Platform>, StoreError> {
        Ok(self.platforms.iter().map(|entry| entry.clone()).collect())
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn next_value(&self, name: &str) -> Result<u64, StoreError> {
        let mut slot = self.counters.entry(name.to_string()).or_insert(0);
        *slot += 1;
        Ok(*slot)
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn append(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.audit.lock().push(entry);
        Ok(())
    }

    async fn for_deal(&self, deal_id: &DealId) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self
            .audit
            .lock()
            .iter()
            .filter(|entry| entry.deal_id.as_ref() == Some(deal_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn put(
        &self,
        user: TelegramId,
        kind: SessionKind,
        value: Value,
        ttl_ms: u64,
    ) -> Result<(), StoreError> {
        self.sessions.insert(
            Self::session_key(user, kind),
            SessionRecord {
                value,
                expires_at: self.clock.now_ms() + ttl_ms,
            },
        );
        Ok(())
    }

    async fn get(
        &self,
        user: TelegramId,
        kind: SessionKind,
    ) -> Result<Option<Value>, StoreError> {
        let key = Self::session_key(user, kind);
        let now = self.clock.now_ms();
        // The ref guard must drop before the expired entry is removed.
        let expired = match self.sessions.get(&key) {
            Some(record) if record.expires_at > now => return Ok(Some(record.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.sessions.remove(&key);
        }
        Ok(None)
    }

    async fn remove(&self, user: TelegramId, kind: SessionKind) -> Result<(), StoreError> {
        self.sessions.remove(&Self::session_key(user, kind));
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now_ms();
        let before = self.sessions.len();
        self.sessions.retain(|_, record| record.expires_at > now);
        Ok(before - self.sessions.len())
    }
}
