use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::models::CacheEntry;

struct Slot {
    entry: CacheEntry,
    expires_at: Instant,
}

/// In-memory response store with lazy per-entry expiry.
///
/// An expired entry is removed when it is next read. Nothing else evicts,
/// unless [`CacheStore::purge_expired`] is called (see the optional sweeper
/// in `main`). Concurrent writers to one key race and the last one wins.
#[derive(Default)]
pub struct CacheStore {
    slots: RwLock<HashMap<String, Slot>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        {
            let slots = self.slots.read().await;
            match slots.get(key) {
                None => return None,
                Some(slot) if Instant::now() <= slot.expires_at => return Some(slot.entry.clone()),
                Some(_) => {}
            }
        }

        // Expired. Re-check under the write lock, a writer may have refreshed it.
        let mut slots = self.slots.write().await;
        let now = Instant::now();
        match slots.get(key) {
            Some(slot) if now <= slot.expires_at => Some(slot.entry.clone()),
            Some(_) => {
                slots.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn put(&self, key: &str, entry: CacheEntry, ttl: Duration) {
        let mut slots = self.slots.write().await;
        slots.insert(
            key.to_string(),
            Slot {
                entry,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub async fn clear(&self) {
        self.slots.write().await.clear();
    }

    /// Drops every expired entry and returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut slots = self.slots.write().await;
        let now = Instant::now();
        let before = slots.len();
        slots.retain(|_, slot| now <= slot.expires_at);
        before - slots.len()
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}
