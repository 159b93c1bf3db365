//! In-memory TTL cache backed by a sharded concurrent map.
//!
//! Expired entries are dropped lazily, on the read that observes them. There is
//! no background sweeper; a workload that writes keys it never reads again will
//! retain them until overwritten. For the lookup-heavy workloads this crate
//! targets, read-side expiry keeps the map tight without a reaper task.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{CacheError, CacheService};

struct Entry {
    value: Bytes,
    expires_at: Instant,
}

/// A process-local [`CacheService`] with per-entry TTL.
///
/// Uses `tokio::time::Instant` so tests can drive expiry with the runtime's
/// virtual clock.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use bytes::Bytes;
/// use readthru::cache::{CacheService, MemoryCache};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache = MemoryCache::new();
/// cache.set("greeting", Bytes::from("hello"), Duration::from_secs(60)).await.unwrap();
/// assert!(cache.get("greeting").await.unwrap().is_some());
/// # }
/// ```
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries currently held, including any whose TTL
    /// has elapsed but which no read has dropped yet.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl CacheService for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.value.clone()));
            }
            // Expired — drop the read guard before removing the entry.
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key.to_owned(), entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn miss_on_unknown_key() {
        let cache = MemoryCache::new();
        assert!(cache.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn round_trip() {
        let cache = MemoryCache::new();
        cache
            .set("k", Bytes::from("v"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(Bytes::from("v")));
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let cache = MemoryCache::new();
        cache
            .set("k", Bytes::from("v"), Duration::from_secs(5))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(cache.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("k").await.unwrap().is_none());
        // The expired read also evicted the entry.
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_restarts_ttl() {
        let cache = MemoryCache::new();
        cache
            .set("k", Bytes::from("old"), Duration::from_secs(5))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        cache
            .set("k", Bytes::from("new"), Duration::from_secs(5))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.get("k").await.unwrap(), Some(Bytes::from("new")));
    }
}
