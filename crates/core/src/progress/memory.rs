//! In-memory store implementations.
//!
//! [`InMemoryAuthoritativeStore`] is a complete authoritative store suitable
//! for a single-process server or tests. [`InMemoryLocalCache`] is a
//! non-durable cache fake.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::model::{CacheEntry, Identity, LocationSeq, ProgressRecord};
use super::traits::{AuthoritativeStore, LocalCache};
use crate::errors::{Result, StoreError};
use crate::sync::KeyedLocks;

fn poisoned<T>(_: T) -> StoreError {
    StoreError::storage("in-memory store lock is poisoned")
}

pub struct InMemoryAuthoritativeStore {
    total_locations: u64,
    records: RwLock<HashMap<Identity, ProgressRecord>>,
    writers: KeyedLocks<Identity>,
}

impl InMemoryAuthoritativeStore {
    pub fn new(total_locations: u64) -> Self {
        Self {
            total_locations,
            records: RwLock::new(HashMap::new()),
            writers: KeyedLocks::new(),
        }
    }

    fn load(&self, identity: &Identity) -> Result<Option<ProgressRecord>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(identity).cloned())
    }

    fn store(&self, identity: &Identity, record: ProgressRecord) -> Result<()> {
        let mut records = self.records.write().map_err(poisoned)?;
        records.insert(identity.clone(), record);
        Ok(())
    }
}

#[async_trait]
impl AuthoritativeStore for InMemoryAuthoritativeStore {
    async fn write(&self, identity: &Identity, location: LocationSeq) -> Result<ProgressRecord> {
        let _guard = self.writers.lock(identity).await;
        let current = self
            .load(identity)?
            .unwrap_or_else(|| ProgressRecord::empty(self.total_locations));
        let next = current.with_completion(location)?;
        if next != current || self.load(identity)?.is_none() {
            self.store(identity, next.clone())?;
        }
        Ok(next)
    }

    async fn read(&self, identity: &Identity) -> Result<ProgressRecord> {
        if let Some(record) = self.load(identity)? {
            return Ok(record);
        }
        let _guard = self.writers.lock(identity).await;
        if let Some(record) = self.load(identity)? {
            return Ok(record);
        }
        let record = ProgressRecord::empty(self.total_locations);
        self.store(identity, record.clone())?;
        Ok(record)
    }
}

#[derive(Default)]
pub struct InMemoryLocalCache {
    entries: RwLock<HashMap<Identity, CacheEntry>>,
}

impl InMemoryLocalCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalCache for InMemoryLocalCache {
    async fn get(&self, identity: &Identity) -> Result<Option<CacheEntry>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(identity).cloned())
    }

    async fn put(&self, identity: &Identity, entry: CacheEntry) -> Result<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.insert(identity.clone(), entry);
        Ok(())
    }

    async fn clear(&self, identity: &Identity) -> Result<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.remove(identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn alice() -> Identity {
        Identity::new("alice").expect("identity")
    }

    #[tokio::test]
    async fn read_lazily_creates_empty_record() {
        let store = InMemoryAuthoritativeStore::new(3);
        let record = store.read(&alice()).await.expect("read");
        assert_eq!(record, ProgressRecord::empty(3));
        assert!(store.load(&alice()).expect("load").is_some());
    }

    #[tokio::test]
    async fn write_twice_equals_write_once() {
        let store = InMemoryAuthoritativeStore::new(3);
        let once = store.write(&alice(), 2).await.expect("write");
        let twice = store.write(&alice(), 2).await.expect("write again");
        assert_eq!(once, twice);
        assert_eq!(twice.completed(), &[2]);
    }

    #[tokio::test]
    async fn out_of_range_write_leaves_record_unchanged() {
        let store = InMemoryAuthoritativeStore::new(3);
        store.write(&alice(), 1).await.expect("write");
        for bad in [0, 4] {
            let err = store.write(&alice(), bad).await.expect_err("rejected");
            assert!(matches!(err, StoreError::InvalidLocation { .. }));
        }
        assert_eq!(store.read(&alice()).await.expect("read").completed(), &[1]);
    }

    #[tokio::test]
    async fn set_never_shrinks_and_flags_stay_derived() {
        let store = InMemoryAuthoritativeStore::new(4);
        let mut previous = 0;
        for loc in [3, 1, 3, 4, 9, 2, 1] {
            let record = match store.write(&alice(), loc).await {
                Ok(record) => record,
                Err(_) => store.read(&alice()).await.expect("read"),
            };
            assert!(record.completed_count() >= previous);
            previous = record.completed_count();
            let flags = record.stage_flags().as_array();
            for (idx, flag) in flags.iter().enumerate() {
                assert_eq!(*flag, record.completed_count() > idx);
            }
        }
        assert_eq!(previous, 4);
    }

    #[tokio::test]
    async fn racing_writes_for_one_identity_keep_every_completion() {
        let store = Arc::new(InMemoryAuthoritativeStore::new(50));
        let mut tasks = Vec::new();
        for loc in 1..=50u64 {
            for _ in 0..2 {
                let store = Arc::clone(&store);
                tasks.push(tokio::spawn(async move {
                    store.write(&alice(), loc).await.expect("write");
                }));
            }
        }
        for task in tasks {
            task.await.expect("join");
        }
        let record = store.read(&alice()).await.expect("read");
        assert_eq!(record.completed_count(), 50);
    }

    #[tokio::test]
    async fn cache_put_replaces_whole_entry() {
        let cache = InMemoryLocalCache::new();
        let first = CacheEntry::confirmed(ProgressRecord::empty(3).with_completion(1).unwrap());
        cache.put(&alice(), first).await.expect("put");
        assert!(!cache.has_unsynced(&alice()).await.expect("has_unsynced"));

        cache.mark_unsynced(&alice(), 3).await.expect("mark");
        assert!(cache.has_unsynced(&alice()).await.expect("has_unsynced"));

        cache.clear(&alice()).await.expect("clear");
        assert!(cache.get(&alice()).await.expect("get").is_none());
        assert!(!cache.has_unsynced(&alice()).await.expect("has_unsynced"));
    }
}
