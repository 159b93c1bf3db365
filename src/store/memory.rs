//! In-memory backing store for tests and embedded deployments.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use super::{BackingStore, StoreError};

/// A [`BackingStore`] over a plain in-process map.
///
/// Mostly useful as the authoritative tier in tests and demos; `insert` and
/// `remove` stand in for whatever writes the real store would receive.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use readthru::store::{BackingStore, MemoryStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::new();
/// store.insert("user:42", Bytes::from("Alice"));
/// assert_eq!(store.fetch("user:42").await.unwrap(), Some(Bytes::from("Alice")));
/// assert_eq!(store.fetch("user:43").await.unwrap(), None);
/// # }
/// ```
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<String, Bytes>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the value for `key`.
    pub fn insert(&self, key: impl Into<String>, value: Bytes) {
        self.rows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
    }

    /// Removes `key`, returning the previous value if any.
    pub fn remove(&self, key: &str) -> Option<Bytes> {
        self.rows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn fetch(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        // The guard never crosses an await point.
        Ok(self
            .rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }
}
