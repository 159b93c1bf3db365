//! Backing store seam — the slow, authoritative source the cache accelerates.
//!
//! A backing store only has to answer fetch-by-key. A database client, an
//! upstream HTTP service, or the bundled [`MemoryStore`] all fit. The store is
//! where truth lives; a key it does not hold does not exist, no matter what a
//! stale cache might say.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod memory;

pub use memory::MemoryStore;

/// Errors produced by a backing store.
///
/// Unlike cache errors these are surfaced: every waiter of the failed fetch
/// episode receives the same failure, wrapped in
/// [`LookupError::Store`](crate::coordinator::LookupError::Store).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backing store unreachable: {0}")]
    Unavailable(String),

    #[error("backing store fetch timed out")]
    Timeout,

    #[error("backing store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An opaque fetch-by-key service.
///
/// # Contract
///
/// - `Ok(Some(value))` — the key exists and `value` is authoritative now.
/// - `Ok(None)` — the key does not exist. This is an answer, not an error; the
///   coordinator reports it as not-found and does not cache it.
/// - `Err(_)` — the store could not answer. The coordinator never caches or
///   retries a failed fetch.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Fetches the authoritative value for `key`. May be slow.
    async fn fetch(&self, key: &str) -> Result<Option<Bytes>, StoreError>;
}
