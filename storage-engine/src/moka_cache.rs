use bytes::Bytes;
use moka::Expiry;
use moka::future::Cache;
use std::fmt::Debug;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
struct StoredValue {
    bytes: Bytes,
    ttl: Duration,
}

/// Expires every entry after the TTL it was written with
struct PerEntryTtl;

impl Expiry<String, StoredValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Moka-based store for a single node database
/// Lock-free and concurrent, with a TTL per entry and an optional entry bound
#[derive(Clone)]
pub struct MokaStore {
    cache: Cache<String, StoredValue>,
}

impl MokaStore {
    /// Create an unbounded store
    pub fn new_unbounded() -> Self {
        Self::new(None, None)
    }

    /// Create a store bounded to `max_entries`
    pub fn new_bounded(max_entries: u64) -> Self {
        Self::new(None, Some(max_entries))
    }

    pub fn new(name: Option<&str>, max_entries: Option<u64>) -> Self {
        let mut builder = Cache::builder().expire_after(PerEntryTtl);

        if let Some(name) = name {
            builder = builder.name(name);
        }

        if let Some(capacity) = max_entries {
            builder = builder.max_capacity(capacity);
        }

        Self {
            cache: builder.build(),
        }
    }

    /// Insert or overwrite `key`; the entry expires `ttl` from now
    pub async fn insert(&self, key: String, bytes: Bytes, ttl: Duration) {
        self.cache.insert(key, StoredValue { bytes, ttl }).await;
    }

    /// `None` if the key never existed or its TTL has run out
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.cache.get(key).await.map(|value| value.bytes)
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.cache.remove(key).await.is_some()
    }

    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

impl Debug for MokaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaStore")
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}
