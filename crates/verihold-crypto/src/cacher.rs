//! `Cacher` (spec §6, §5 write-through cache discipline): a small
//! capability trait repositories use to avoid round-tripping to Postgres
//! for read-heavy, rarely-changing rows (realm config, authorized app
//! lookups). Grounded on the in-memory backend the teacher ships alongside
//! its Redis cache (`meridian-cache::backend::memory`); no remote cache
//! backend is in scope here.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// A byte-oriented cache with per-entry TTLs.
#[async_trait]
pub trait Cacher: Send + Sync {
    /// Fetch `key`, if present and not expired.
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration);

    /// Remove `key`, if present. Used for write-through invalidation after
    /// a mutating write commits.
    async fn delete(&self, key: &str);
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// An in-process TTL cache. Entries do not survive process restart and are
/// not shared across processes — a stand-in for local development and
/// tests, not a replacement for a real distributed cache.
#[derive(Default)]
pub struct InMemoryCacher {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryCacher {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently stored, including ones that have
    /// expired but not yet been evicted by a subsequent `get`.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// True if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Cacher for InMemoryCacher {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let hit = {
            let entries = self.entries.read().unwrap();
            entries.get(key).map(|e| (e.value.clone(), e.expires_at))
        };
        match hit {
            Some((value, expires_at)) if expires_at > Instant::now() => Some(value),
            Some(_) => {
                self.entries.write().unwrap().remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        self.entries.write().unwrap().insert(
            key.to_string(),
            Entry { value, expires_at: Instant::now() + ttl },
        );
    }

    async fn delete(&self, key: &str) {
        self.entries.write().unwrap().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_retrieves_values() {
        let cache = InMemoryCacher::new();
        cache.set("realm:1", b"config".to_vec(), Duration::from_secs(60)).await;
        assert_eq!(cache.get("realm:1").await, Some(b"config".to_vec()));
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let cache = InMemoryCacher::new();
        cache.set("realm:1", b"config".to_vec(), Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("realm:1").await, None);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let cache = InMemoryCacher::new();
        cache.set("realm:1", b"config".to_vec(), Duration::from_secs(60)).await;
        cache.delete("realm:1").await;
        assert_eq!(cache.get("realm:1").await, None);
    }
}
