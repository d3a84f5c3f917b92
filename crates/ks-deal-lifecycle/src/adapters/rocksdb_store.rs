//! RocksDB document store.
//!
//! Production persistence: one column family per collection, serde_json
//! values wrapped in a versioned envelope. RocksDB itself has no
//! compare-and-set, so conditional writes run under a striped key lock
//! that serializes read-check-write per key while unrelated keys proceed.
//!
//! ## Column Families
//!
//! - `deals` - deal documents
//! - `deal_index` - multisig address → deal id
//! - `users` - user documents
//! - `disputes` - dispute documents keyed by deal id
//! - `platforms` - platform documents
//! - `counters` - named monotonic counters
//! - `audit` - append-only audit entries, time-ordered keys
//! - `sessions` - advisory TTL blobs

use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, DB};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use shared_types::{Clock, DealId, PlatformCode, TelegramId, TimestampMs, WalletAddress};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

use crate::domain::{
    AuditEntry, Deal, DealStatus, Dispute, DisputeStatus, Platform, SessionKind, StoreError, User,
};
use crate::ports::inbound::DealFilter;
use crate::ports::outbound::{
    AuditSink, CounterStore, DealRepository, DisputeRepository, PlatformRepository, SessionStore,
    UserRepository,
};

/// Version stamped into every persisted envelope.
pub const CURRENT_SCHEMA_VERSION: u16 = 1;

const CF_DEALS: &str = "deals";
const CF_DEAL_INDEX: &str = "deal_index";
const CF_USERS: &str = "users";
const CF_DISPUTES: &str = "disputes";
const CF_PLATFORMS: &str = "platforms";
const CF_COUNTERS: &str = "counters";
const CF_AUDIT: &str = "audit";
const CF_SESSIONS: &str = "sessions";

const COLUMN_FAMILIES: &[&str] = &[
    CF_DEALS,
    CF_DEAL_INDEX,
    CF_USERS,
    CF_DISPUTES,
    CF_PLATFORMS,
    CF_COUNTERS,
    CF_AUDIT,
    CF_SESSIONS,
];

const LOCK_STRIPES: usize = 64;

/// Versioned envelope around every stored document.
#[derive(Serialize, Deserialize)]
struct Document<T> {
    schema_version: u16,
    doc: T,
}

#[derive(Serialize, Deserialize)]
struct SessionDoc {
    expires_at: TimestampMs,
    value: Value,
}

/// RocksDB configuration.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Database directory.
    pub path: String,
    /// Write buffer size in bytes.
    pub write_buffer_size: usize,
    /// Create the database if missing.
    pub create_if_missing: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: "./data/keyshield".to_string(),
            write_buffer_size: 32 * 1024 * 1024,
            create_if_missing: true,
        }
    }
}

impl RocksDbConfig {
    /// Small-buffer config for tests.
    pub fn for_testing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            write_buffer_size: 4 * 1024 * 1024,
            create_if_missing: true,
        }
    }
}

/// The durable document store.
pub struct RocksDbStore {
    db: DB,
    stripes: Vec<parking_lot::Mutex<()>>,
    clock: Arc<dyn Clock>,
}

impl RocksDbStore {
    /// Open or create the database with every collection.
    pub fn open(config: &RocksDbConfig, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(config.create_if_missing);
        opts.create_missing_column_families(true);
        opts.set_write_buffer_size(config.write_buffer_size);

        let descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, Path::new(&config.path), descriptors)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self {
            db,
            stripes: (0..LOCK_STRIPES)
                .map(|_| parking_lot::Mutex::new(()))
                .collect(),
            clock,
        })
    }

    fn stripe(&self, key: &str) -> &parking_lot::Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % LOCK_STRIPES]
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family {name}")))
    }

    fn encode<T: Serialize>(doc: &T) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(&Document {
            schema_version: CURRENT_SCHEMA_VERSION,
            doc,
        })
        .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
        let envelope: Document<T> = serde_json::from_slice(bytes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        if envelope.schema_version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::Serialization(format!(
                "document from a newer schema ({})",
                envelope.schema_version
            )));
        }
        Ok(envelope.doc)
    }

    fn put<T: Serialize>(&self, cf: &str, key: &str, doc: &T) -> Result<(), StoreError> {
        self.db
            .put_cf(self.cf(cf)?, key.as_bytes(), Self::encode(doc)?)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn fetch<T: DeserializeOwned>(&self, cf: &str, key: &str) -> Result<Option<T>, StoreError> {
        match self
            .db
            .get_cf(self.cf(cf)?, key.as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>, StoreError> {
        let mut docs = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            docs.push(Self::decode(&value)?);
        }
        Ok(docs)
    }

    fn index_multisig(&self, deal: &Deal) -> Result<(), StoreError> {
        if let Some(address) = &deal.multisig_address {
            self.db
                .put_cf(
                    self.cf(CF_DEAL_INDEX)?,
                    address.as_str().as_bytes(),
                    deal.id.as_str().as_bytes(),
                )
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        Ok(())
    }

    fn session_key(user: TelegramId, kind: SessionKind) -> String {
        format!("{user}:{}", kind.as_str())
    }
}

#[async_trait]
impl DealRepository for RocksDbStore {
    async fn insert(&self, deal: &Deal) -> Result<(), StoreError> {
        let _guard = self.stripe(deal.id.as_str()).lock();
        if self.fetch::<Deal>(CF_DEALS, deal.id.as_str())?.is_some() {
            return Err(StoreError::AlreadyExists(deal.id.to_string()));
        }
        self.put(CF_DEALS, deal.id.as_str(), deal)?;
        self.index_multisig(deal)
    }

    async fn get(&self, id: &DealId) -> Result<Option<Deal>, StoreError> {
        self.fetch(CF_DEALS, id.as_str())
    }

    async fn update(&self, deal: &Deal) -> Result<(), StoreError> {
        let _guard = self.stripe(deal.id.as_str()).lock();
        if self.fetch::<Deal>(CF_DEALS, deal.id.as_str())?.is_none() {
            return Err(StoreError::NotFound(deal.id.to_string()));
        }
        self.put(CF_DEALS, deal.id.as_str(), deal)?;
        self.index_multisig(deal)
    }

    async fn transition(&self, deal: &Deal, expected: DealStatus) -> Result<(), StoreError> {
        let _guard = self.stripe(deal.id.as_str()).lock();
        let stored: Deal = self
            .fetch(CF_DEALS, deal.id.as_str())?
            .ok_or_else(|| StoreError::NotFound(deal.id.to_string()))?;
        if stored.status != expected {
            return Err(StoreError::StatusConflict {
                actual: stored.status,
            });
        }
        self.put(CF_DEALS, deal.id.as_str(), deal)?;
        self.index_multisig(deal)
    }

    async fn find_by_multisig(
        &self,
        address: &WalletAddress,
    ) -> Result<Option<Deal>, StoreError> {
        let Some(bytes) = self
            .db
            .get_cf(self.cf(CF_DEAL_INDEX)?, address.as_str().as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?
        else {
            return Ok(None);
        };
        let id = String::from_utf8(bytes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.fetch(CF_DEALS, &id)
    }

    async fn with_deadline_before(&self, cutoff: TimestampMs) -> Result<Vec<Deal>, StoreError> {
        Ok(self
            .scan::<Deal>(CF_DEALS)?
            .into_iter()
            .filter(|d| !d.status.is_terminal() && d.deadline <= cutoff)
            .collect())
    }

    async fn list_payout_pending(&self) -> Result<Vec<Deal>, StoreError> {
        Ok(self
            .scan::<Deal>(CF_DEALS)?
            .into_iter()
            .filter(|d| d.payout_pending && !d.status.is_terminal())
            .collect())
    }

    async fn list_by_platform(
        &self,
        code: &PlatformCode,
        filter: &DealFilter,
    ) -> Result<Vec<Deal>, StoreError> {
        let mut deals: Vec<Deal> = self
            .scan::<Deal>(CF_DEALS)?
            .into_iter()
            .filter(|d| d.platform_code.as_ref() == Some(code))
            .filter(|d| filter.status.map_or(true, |s| d.status == s))
            .filter(|d| filter.include_hidden || !d.hidden)
            .collect();
        deals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deals)
    }
}

#[async_trait]
impl UserRepository for RocksDbStore {
    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        let key = user.telegram_id.to_string();
        let _guard = self.stripe(&key).lock();
        if self.fetch::<User>(CF_USERS, &key)?.is_some() {
            return Err(StoreError::AlreadyExists(key));
        }
        self.put(CF_USERS, &key, user)
    }

    async fn get(&self, id: TelegramId) -> Result<Option<User>, StoreError> {
        self.fetch(CF_USERS, &id.to_string())
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        let key = user.telegram_id.to_string();
        let _guard = self.stripe(&key).lock();
        let stored: User = self
            .fetch(CF_USERS, &key)?
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        // The claim is owned by the conditional ops; preserve it.
        let mut user = user.clone();
        user.active_deal_id = stored.active_deal_id;
        self.put(CF_USERS, &key, &user)
    }

    async fn try_claim_active_deal(
        &self,
        user: TelegramId,
        deal: &DealId,
    ) -> Result<(), StoreError> {
        let key = user.to_string();
        let _guard = self.stripe(&key).lock();
        let mut stored: User = self
            .fetch(CF_USERS, &key)?
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        match &stored.active_deal_id {
            Some(current) if current == deal => Ok(()),
            Some(_) => Err(StoreError::ActiveDealTaken),
            None => {
                stored.active_deal_id = Some(deal.clone());
                self.put(CF_USERS, &key, &stored)
            }
        }
    }

    async fn release_active_deal(
        &self,
        user: TelegramId,
        deal: &DealId,
    ) -> Result<(), StoreError> {
        let key = user.to_string();
        let _guard = self.stripe(&key).lock();
        let Some(mut stored) = self.fetch::<User>(CF_USERS, &key)? else {
            return Ok(());
        };
        if stored.active_deal_id.as_ref() == Some(deal) {
            stored.active_deal_id = None;
            self.put(CF_USERS, &key, &stored)?;
        }
        Ok(())
    }

    async fn count_by_platform(&self, code: &PlatformCode) -> Result<u64, StoreError> {
        Ok(self
            .scan::<User>(CF_USERS)?
            .into_iter()
            .filter(|u| u.platform_code.as_ref() == Some(code))
            .count() as u64)
    }
}

#[async_trait]
impl DisputeRepository for RocksDbStore {
    async fn create(&self, dispute: &Dispute) -> Result<(), StoreError> {
        let key = dispute.deal_id.as_str();
        let _guard = self.stripe(key).lock();
        if self.fetch::<Dispute>(CF_DISPUTES, key)?.is_some() {
            return Err(StoreError::AlreadyExists(dispute.deal_id.to_string()));
        }
        self.put(CF_DISPUTES, key, dispute)
    }

    async fn get(&self, deal_id: &DealId) -> Result<Option<Dispute>, StoreError> {
        self.fetch(CF_DISPUTES, deal_id.as_str())
    }

    async fn update(&self, dispute: &Dispute) -> Result<(), StoreError> {
        let key = dispute.deal_id.as_str();
        let _guard = self.stripe(key).lock();
        if self.fetch::<Dispute>(CF_DISPUTES, key)?.is_none() {
            return Err(StoreError::NotFound(dispute.deal_id.to_string()));
        }
        self.put(CF_DISPUTES, key, dispute)
    }

    async fn remove(&self, deal_id: &DealId) -> Result<(), StoreError> {
        self.db
            .delete_cf(self.cf(CF_DISPUTES)?, deal_id.as_str().as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn list_unresolved(&self) -> Result<Vec<Dispute>, StoreError> {
        Ok(self
            .scan::<Dispute>(CF_DISPUTES)?
            .into_iter()
            .filter(|d| d.status != DisputeStatus::Resolved)
            .collect())
    }
}

#[async_trait]
impl PlatformRepository for RocksDbStore {
    async fn insert(&self, platform: &Platform) -> Result<(), StoreError> {
        let key = platform.code.as_str();
        let _guard = self.stripe(key).lock();
        if self.fetch::<Platform>(CF_PLATFORMS, key)?.is_some() {
            return Err(StoreError::AlreadyExists(platform.code.to_string()));
        }
        self.put(CF_PLATFORMS, key, platform)
    }

    async fn get(&self, code: &PlatformCode) -> Result<Option<Platform>, StoreError> {
        self.fetch(CF_PLATFORMS, code.as_str())
    }

    async fn update(&self, platform: &Platform) -> Result<(), StoreError> {
        let key = platform.code.as_str();
        let _guard = self.stripe(key).lock();
        if self.fetch::<Platform>(CF_PLATFORMS, key)?.is_none() {
            return Err(StoreError::NotFound(platform.code.to_string()));
        }
        self.put(CF_PLATFORMS, key, platform)
    }

    async fn list(&self) -> Result<Vec<Platform>, StoreError> {
        self.scan(CF_PLATFORMS)
    }
}

#[async_trait]
impl CounterStore for RocksDbStore {
    async fn next_value(&self, name: &str) -> Result<u64, StoreError> {
        let _guard = self.stripe(name).lock();
        let current: u64 = self.fetch(CF_COUNTERS, name)?.unwrap_or(0);
        let next = current + 1;
        self.put(CF_COUNTERS, name, &next)?;
        Ok(next)
    }
}

#[async_trait]
impl AuditSink for RocksDbStore {
    async fn append(&self, entry: AuditEntry) -> Result<(), StoreError> {
        // Time-ordered keys so prefix scans return entries in append order.
        let key = match &entry.deal_id {
            Some(deal_id) => format!("d:{}:{:020}:{}", deal_id, entry.at, entry.id),
            None => format!("g:{:020}:{}", entry.at, entry.id),
        };
        self.put(CF_AUDIT, &key, &entry)
    }

    async fn for_deal(&self, deal_id: &DealId) -> Result<Vec<AuditEntry>, StoreError> {
        let prefix = format!("d:{deal_id}:");
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(
            self.cf(CF_AUDIT)?,
            IteratorMode::From(prefix.as_bytes(), rocksdb::Direction::Forward),
        ) {
            let (key, value) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            entries.push(Self::decode(&value)?);
        }
        Ok(entries)
    }
}

#[async_trait]
impl SessionStore for RocksDbStore {
    async fn put(
        &self,
        user: TelegramId,
        kind: SessionKind,
        value: Value,
        ttl_ms: u64,
    ) -> Result<(), StoreError> {
        let doc = SessionDoc {
            expires_at: self.clock.now_ms() + ttl_ms,
            value,
        };
        RocksDbStore::put(self, CF_SESSIONS, &Self::session_key(user, kind), &doc)
    }

    async fn get(
        &self,
        user: TelegramId,
        kind: SessionKind,
    ) -> Result<Option<Value>, StoreError> {
        let key = Self::session_key(user, kind);
        match self.fetch::<SessionDoc>(CF_SESSIONS, &key)? {
            Some(doc) if doc.expires_at > self.clock.now_ms() => Ok(Some(doc.value)),
            Some(_) => {
                self.db
                    .delete_cf(self.cf(CF_SESSIONS)?, key.as_bytes())
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, user: TelegramId, kind: SessionKind) -> Result<(), StoreError> {
        self.db
            .delete_cf(
                self.cf(CF_SESSIONS)?,
                Self::session_key(user, kind).as_bytes(),
            )
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now_ms();
        let mut expired = Vec::new();
        for item in self.db.iterator_cf(self.cf(CF_SESSIONS)?, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            let doc: SessionDoc = Self::decode(&value)?;
            if doc.expires_at <= now {
                expired.push(key);
            }
        }
        let count = expired.len();
        for key in expired {
            self.db
                .delete_cf(self.cf(CF_SESSIONS)?, &key)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        Ok(count)
    }
}
