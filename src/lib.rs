//! # readthru
//!
//! A single-flight, cache-aside read-through coordinator, with an embeddable
//! HTTP lookup gateway.
//!
//! The [`Coordinator`] sits between a fast cache tier and a slow authoritative
//! store. Lookups probe the cache first; concurrent misses for the same key
//! collapse into one backing-store fetch whose outcome fans out to every
//! waiter, and successful fetches populate the cache with a configurable TTL.
//! Cache and store are trait seams ([`CacheService`], [`BackingStore`]), so
//! any key-value engine can sit behind them; in-memory implementations are
//! bundled.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use readthru::cache::MemoryCache;
//! use readthru::coordinator::Coordinator;
//! use readthru::server::{Gateway, Server};
//! use readthru::store::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     store.insert("user:42", Bytes::from("Alice"));
//!
//!     let lookups = Coordinator::with_defaults(Arc::new(MemoryCache::new()), store);
//!     let server = Server::bind("127.0.0.1:5000").await?;
//!     println!("Listening on http://127.0.0.1:5000");
//!     server.run(Gateway::new(lookups)).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod coordinator;
pub mod http;
pub mod server;
pub mod store;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheError, CacheService, MemoryCache};
pub use coordinator::{
    Coordinator, CoordinatorConfig, CoordinatorStats, Lookup, LookupError, Source,
};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use server::{CorsPolicy, Gateway, Server, ServerError};
pub use store::{BackingStore, MemoryStore, StoreError};
