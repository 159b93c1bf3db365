//! Cache service seam — the fast tier the coordinator probes before the store.
//!
//! The cache is an opaque key-value service with GET and SET-with-TTL. Anything
//! that can answer those two calls can sit behind [`CacheService`]: the bundled
//! [`MemoryCache`], a Redis client wrapper, a disk cache. The coordinator never
//! assumes more than the trait promises; in particular, expiration enforcement
//! is the cache's own responsibility.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod memory;

pub use memory::MemoryCache;

/// Errors produced by a cache service.
///
/// The coordinator absorbs these: a failing cache degrades a lookup to a miss,
/// it never fails it.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache service unreachable: {0}")]
    Unavailable(String),

    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An opaque key-value cache with per-entry TTL.
///
/// # Contract
///
/// - `get` must never return an entry whose TTL has elapsed.
/// - `set` replaces any existing entry for the key and restarts its lifetime.
/// - Implementations must be safe under concurrent calls; the coordinator
///   issues them from many tasks at once.
#[async_trait]
pub trait CacheService: Send + Sync {
    /// Looks up an unexpired entry. `Ok(None)` is a miss.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Stores `value` under `key` for at most `ttl`.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError>;
}
