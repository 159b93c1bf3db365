//! Cache-aside read-through coordinator with single-flight miss handling.
//!
//! [`Coordinator::get`] consults the cache service first and falls back to the
//! backing store on a miss. Concurrent misses for the same key are collapsed
//! into one store fetch: the first caller starts a detached fetch task, every
//! later caller joins it, and all of them receive the same outcome. Successful
//! fetches populate the cache with a configured TTL before the outcome is
//! broadcast.
//!
//! Per key the coordinator moves `Idle → FetchInFlight → Idle`; the in-flight
//! entry exists only while a fetch is unresolved, and a caller arriving after
//! resolution starts a fresh cycle.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use readthru::cache::MemoryCache;
//! use readthru::coordinator::{Coordinator, Source};
//! use readthru::store::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     store.insert("user:42", Bytes::from("Alice"));
//!
//!     let lookups = Coordinator::with_defaults(Arc::new(MemoryCache::new()), store);
//!     let first = lookups.get("user:42").await?;
//!     assert_eq!(first.source, Source::Store);
//!     let second = lookups.get("user:42").await?;
//!     assert_eq!(second.source, Source::Cache);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::CacheService;
use crate::store::{BackingStore, StoreError};

/// Upper bound on key length, in bytes. Keeps keys within the limits common to
/// external cache engines and keeps log lines sane.
const MAX_KEY_BYTES: usize = 512;

/// Where a lookup's value was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Served from the cache tier; the backing store was not touched.
    Cache,
    /// Served from the backing store via a fetch episode (this caller started
    /// it or joined it).
    Store,
}

impl Source {
    /// Returns the tag as a string slice (`"cache"` / `"store"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Store => "store",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved lookup: the value and which tier produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    /// The opaque payload associated with the key.
    pub value: Bytes,
    /// Which tier served it.
    pub source: Source,
}

/// Errors surfaced by [`Coordinator::get`] and [`Coordinator::get_within`].
///
/// `Clone` because one fetch episode's failure fans out to every waiter that
/// joined it. Cache-service failures never appear here: the coordinator
/// absorbs them and degrades to the store.
#[derive(Debug, Clone, Error)]
pub enum LookupError {
    /// The key was rejected before any I/O: empty, longer than 512 bytes, or
    /// containing ASCII control characters.
    #[error("lookup key is empty, too long, or contains control characters")]
    InvalidKey,

    /// The backing store answered authoritatively that the key does not
    /// exist. Never cached; the next caller starts a fresh episode.
    #[error("key not present in the backing store")]
    NotFound,

    /// The fetch episode failed. Every waiter of the episode receives the
    /// same shared failure. An elapsed fetch timeout appears here as
    /// [`StoreError::Timeout`].
    #[error("backing store fetch failed: {0}")]
    Store(#[source] Arc<StoreError>),

    /// This caller's own deadline elapsed while waiting. Caller-local: the
    /// underlying fetch keeps running for the other waiters and still
    /// populates the cache on success.
    #[error("deadline elapsed before the lookup resolved")]
    DeadlineExceeded,
}

/// Tunables for a [`Coordinator`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use readthru::coordinator::CoordinatorConfig;
///
/// let config = CoordinatorConfig::new()
///     .with_ttl(Duration::from_secs(300))
///     .with_fetch_timeout(Duration::from_secs(2));
/// assert_eq!(config.ttl, Duration::from_secs(300));
/// ```
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Lifetime written with each cache populate.
    pub ttl: Duration,
    /// Deadline applied to each backing-store fetch. Elapsing fails the
    /// episode with [`StoreError::Timeout`].
    pub fetch_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

impl CoordinatorConfig {
    /// Creates a config with the defaults: 1 h TTL, 10 s fetch timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache-populate TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the backing-store fetch deadline.
    #[must_use]
    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }
}

/// Point-in-time counter snapshot, taken with [`Coordinator::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Lookups answered by the cache tier.
    pub cache_hits: u64,
    /// Lookups that fell through to a fetch episode (including degraded-mode
    /// misses caused by a failing cache).
    pub cache_misses: u64,
    /// Fetch episodes started (one per miss episode, not per caller).
    pub fetches_started: u64,
    /// Callers that joined an episode another caller had already started.
    pub waiters_joined: u64,
    /// Cache-service failures absorbed (probe or populate).
    pub cache_errors: u64,
}

impl CoordinatorStats {
    /// Fraction of lookups served by the cache, 0.0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    fetches_started: AtomicU64,
    waiters_joined: AtomicU64,
    cache_errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            waiters_joined: self.waiters_joined.load(Ordering::Relaxed),
            cache_errors: self.cache_errors.load(Ordering::Relaxed),
        }
    }
}

/// What a fetch episode resolves to, shared verbatim by every waiter.
type EpisodeOutcome = Result<Bytes, LookupError>;

/// Receiver half of an episode's broadcast channel. `None` until resolved.
type EpisodeReceiver = watch::Receiver<Option<EpisodeOutcome>>;

/// The cache-aside read-through coordinator.
///
/// Owns the in-flight fetch table exclusively; the cache service and backing
/// store are injected, independently owned collaborators reached only through
/// their traits. Cloning is cheap and clones share all state, so one
/// coordinator can be handed to any number of tasks.
pub struct Coordinator<C, S> {
    cache: Arc<C>,
    store: Arc<S>,
    config: CoordinatorConfig,
    /// key → receiver for the unresolved episode. At most one entry per key
    /// at any instant; the fetch task removes its entry before broadcasting.
    inflight: Arc<DashMap<String, EpisodeReceiver>>,
    counters: Arc<Counters>,
}

impl<C, S> Clone for Coordinator<C, S> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            inflight: Arc::clone(&self.inflight),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<C, S> Coordinator<C, S>
where
    C: CacheService + 'static,
    S: BackingStore + 'static,
{
    /// Creates a coordinator over the given cache and store.
    pub fn new(cache: Arc<C>, store: Arc<S>, config: CoordinatorConfig) -> Self {
        Self {
            cache,
            store,
            config,
            inflight: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Creates a coordinator with the default configuration.
    pub fn with_defaults(cache: Arc<C>, store: Arc<S>) -> Self {
        Self::new(cache, store, CoordinatorConfig::default())
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Returns a snapshot of the lookup counters.
    pub fn stats(&self) -> CoordinatorStats {
        self.counters.snapshot()
    }

    /// Looks up `key`, cache first, store on miss.
    ///
    /// Concurrent calls for the same missing key share one store fetch and one
    /// outcome. A cache hit never touches the store and never waits on other
    /// callers.
    ///
    /// # Errors
    ///
    /// - [`LookupError::InvalidKey`] — rejected before any I/O.
    /// - [`LookupError::NotFound`] — the store has no value for the key.
    /// - [`LookupError::Store`] — the fetch episode failed; shared by all of
    ///   its waiters.
    pub async fn get(&self, key: &str) -> Result<Lookup, LookupError> {
        validate_key(key)?;
        self.lookup(key).await
    }

    /// Like [`get`](Self::get), bounded by a caller-local deadline.
    ///
    /// Elapsing returns [`LookupError::DeadlineExceeded`] to this caller only;
    /// an in-flight fetch is unaffected and still populates the cache for
    /// future callers.
    pub async fn get_within(&self, key: &str, wait: Duration) -> Result<Lookup, LookupError> {
        validate_key(key)?;
        match tokio::time::timeout(wait, self.lookup(key)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(key, ?wait, "caller deadline elapsed");
                Err(LookupError::DeadlineExceeded)
            }
        }
    }

    async fn lookup(&self, key: &str) -> Result<Lookup, LookupError> {
        match self.cache.get(key).await {
            Ok(Some(value)) => {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache hit");
                return Ok(Lookup {
                    value,
                    source: Source::Cache,
                });
            }
            Ok(None) => {}
            Err(e) => {
                self.counters.cache_errors.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %e, "cache probe failed, treating as miss");
            }
        }
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);

        let rx = self.join_or_start(key);
        let value = await_episode(rx).await?;
        Ok(Lookup {
            value,
            source: Source::Store,
        })
    }

    /// Joins the key's unresolved episode, or starts one and becomes a waiter
    /// on it like everyone else.
    ///
    /// The map's entry API makes check-and-create atomic per key, so two
    /// simultaneous misses cannot both spawn a fetch. No lock is held across
    /// an await: the entry guard lives only for this synchronous block.
    fn join_or_start(&self, key: &str) -> EpisodeReceiver {
        match self.inflight.entry(key.to_owned()) {
            Entry::Occupied(entry) => {
                self.counters.waiters_joined.fetch_add(1, Ordering::Relaxed);
                debug!(key, "joining in-flight fetch");
                entry.get().clone()
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(None);
                slot.insert(rx.clone());
                self.counters.fetches_started.fetch_add(1, Ordering::Relaxed);
                debug!(key, "starting fetch episode");
                self.spawn_fetch(key.to_owned(), tx);
                rx
            }
        }
    }

    /// Runs the fetch in its own task so that no caller future owns it:
    /// dropping or timing out a caller cannot abort the episode.
    fn spawn_fetch(&self, key: String, tx: watch::Sender<Option<EpisodeOutcome>>) {
        let cache = Arc::clone(&self.cache);
        let store = Arc::clone(&self.store);
        let inflight = Arc::clone(&self.inflight);
        let counters = Arc::clone(&self.counters);
        let ttl = self.config.ttl;
        let fetch_timeout = self.config.fetch_timeout;

        tokio::spawn(async move {
            let outcome = run_fetch(&*store, &*cache, &counters, &key, ttl, fetch_timeout).await;
            // Remove before broadcasting: anyone arriving from here on starts
            // a fresh cycle instead of observing a resolved episode.
            inflight.remove(&key);
            let _ = tx.send(Some(outcome));
        });
    }
}

/// One fetch episode: store fetch under the configured deadline, cache
/// populate on success. Failures and not-found are returned unpopulated.
async fn run_fetch<C, S>(
    store: &S,
    cache: &C,
    counters: &Counters,
    key: &str,
    ttl: Duration,
    fetch_timeout: Duration,
) -> EpisodeOutcome
where
    C: CacheService,
    S: BackingStore,
{
    match tokio::time::timeout(fetch_timeout, store.fetch(key)).await {
        Err(_) => {
            warn!(key, timeout = ?fetch_timeout, "backing store fetch timed out");
            Err(LookupError::Store(Arc::new(StoreError::Timeout)))
        }
        Ok(Err(e)) => {
            warn!(key, error = %e, "backing store fetch failed");
            Err(LookupError::Store(Arc::new(e)))
        }
        Ok(Ok(None)) => {
            debug!(key, "backing store has no value");
            Err(LookupError::NotFound)
        }
        Ok(Ok(Some(value))) => {
            if let Err(e) = cache.set(key, value.clone(), ttl).await {
                counters.cache_errors.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %e, "cache populate failed, serving value anyway");
            }
            Ok(value)
        }
    }
}

/// Waits for an episode's broadcast outcome.
async fn await_episode(mut rx: EpisodeReceiver) -> EpisodeOutcome {
    loop {
        let resolved = (*rx.borrow_and_update()).clone();
        if let Some(outcome) = resolved {
            return outcome;
        }
        if rx.changed().await.is_err() {
            // The fetch task dropped its sender without resolving. Nothing
            // was cached, so report the episode as a store failure.
            return Err(LookupError::Store(Arc::new(StoreError::Unavailable(
                "fetch task aborted before resolving".to_owned(),
            ))));
        }
    }
}

fn validate_key(key: &str) -> Result<(), LookupError> {
    if key.is_empty() || key.len() > MAX_KEY_BYTES || key.bytes().any(|b| b.is_ascii_control()) {
        return Err(LookupError::InvalidKey);
    }
    Ok(())
}
