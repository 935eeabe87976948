//! Hot cache of lobby game-state snapshots.
//!
//! A bounded map in front of the session store: saves land here first and
//! spill to the store when the oldest entry is evicted or when the periodic
//! bulk flush runs. Loads fall through to the store on a miss and
//! re-populate the cache, so a restored-then-abandoned lobby can be flushed
//! again later.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use crate::store::SessionStore;

struct Snapshot {
    blob: Vec<u8>,
    saved_at: Instant,
}

pub struct SnapshotCache {
    entries: DashMap<String, Snapshot>,
    capacity: usize,
    store: Option<Arc<SessionStore>>,
}

impl SnapshotCache {
    pub fn new(capacity: usize, store: Option<Arc<SessionStore>>) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            store,
        }
    }

    /// Overwrite the entry for `code` with a fresh timestamp, evicting the
    /// oldest entry to the store when the cache outgrows its bound.
    pub fn save(&self, code: &str, blob: Vec<u8>) {
        self.entries.insert(
            code.to_string(),
            Snapshot {
                blob,
                saved_at: Instant::now(),
            },
        );
        if self.entries.len() > self.capacity {
            self.evict_oldest();
        }
    }

    /// Non-destructive read. On a cache miss the store is consulted and a
    /// hit re-populates the cache before returning.
    pub async fn load(&self, code: &str) -> Option<Vec<u8>> {
        if let Some(entry) = self.entries.get(code) {
            return Some(entry.blob.clone());
        }
        let store = self.store.as_ref()?;
        match store.load(code).await {
            Ok(Some(blob)) => {
                self.save(code, blob.clone());
                Some(blob)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(code, error = %err, "snapshot load from store failed");
                None
            }
        }
    }

    /// Cache-only membership check.
    pub fn has(&self, code: &str) -> bool {
        self.entries.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Upsert every cached snapshot to the store in one batch.
    pub async fn flush_all(&self) {
        let Some(store) = &self.store else { return };
        let entries: Vec<(String, Vec<u8>)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().blob.clone()))
            .collect();
        if entries.is_empty() {
            return;
        }
        match store.upsert_batch(&entries).await {
            Ok(()) => tracing::debug!(count = entries.len(), "flushed snapshots to store"),
            Err(err) => tracing::warn!(error = %err, "bulk snapshot flush failed"),
        }
    }

    /// Drop the entry with the smallest write timestamp, upserting it to the
    /// store on a spawned task. A failed upsert is logged, never re-inserted.
    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().saved_at)
            .map(|entry| entry.key().clone());
        let Some(code) = oldest else { return };
        let Some((code, snapshot)) = self.entries.remove(&code) else {
            return;
        };
        let Some(store) = self.store.clone() else {
            tracing::warn!(code = %code, "evicted snapshot without a store, state lost");
            return;
        };
        tokio::spawn(async move {
            if let Err(err) = store.upsert(&code, &snapshot.blob).await {
                tracing::warn!(code = %code, error = %err, "failed to persist evicted snapshot");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let cache = SnapshotCache::new(8, None);
        cache.save("AB12CD", vec![1, 2, 3]);
        assert!(cache.has("AB12CD"));
        assert_eq!(cache.load("AB12CD").await, Some(vec![1, 2, 3]));
        // load is non-destructive
        assert!(cache.has("AB12CD"));
    }

    #[tokio::test]
    async fn save_overwrites_existing_entry() {
        let cache = SnapshotCache::new(8, None);
        cache.save("AB12CD", vec![1]);
        cache.save("AB12CD", vec![2]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.load("AB12CD").await, Some(vec![2]));
    }

    #[tokio::test]
    async fn miss_without_store_returns_none() {
        let cache = SnapshotCache::new(8, None);
        assert_eq!(cache.load("AB12CD").await, None);
        assert!(!cache.has("AB12CD"));
    }

    #[tokio::test]
    async fn eviction_drops_the_oldest_entry() {
        let cache = SnapshotCache::new(2, None);
        cache.save("AAAAAA", vec![1]);
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.save("BBBBBB", vec![2]);
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.save("CCCCCC", vec![3]);
        assert_eq!(cache.len(), 2);
        assert!(!cache.has("AAAAAA"));
        assert!(cache.has("BBBBBB"));
        assert!(cache.has("CCCCCC"));
    }

    #[tokio::test]
    async fn overwrite_refreshes_eviction_order() {
        let cache = SnapshotCache::new(2, None);
        cache.save("AAAAAA", vec![1]);
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.save("BBBBBB", vec![2]);
        tokio::time::sleep(Duration::from_millis(5)).await;
        // refresh the older entry, making BBBBBB the eviction candidate
        cache.save("AAAAAA", vec![9]);
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.save("CCCCCC", vec![3]);
        assert!(cache.has("AAAAAA"));
        assert!(!cache.has("BBBBBB"));
        assert!(cache.has("CCCCCC"));
    }
}
