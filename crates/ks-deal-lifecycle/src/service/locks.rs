//! Keyed async mutex registry.
//!
//! Linearizes events for one deal (or one platform) while letting different
//! keys progress concurrently. The lock is advisory: the repository CAS is
//! the authoritative serialization, the mutex only keeps CAS contention and
//! wasted blockchain calls down.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of per-key mutexes. Entries are created on first use and kept;
/// the key space (deals, platforms) is small enough that eviction is not
/// worth the races it invites.
#[derive(Default)]
pub struct LockRegistry {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the mutex for `key`, waiting if another task holds it.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Number of keys ever locked. For tests and introspection.
    pub fn key_count(&self) -> usize {
        self.locks.len()
    }
}
