//! # counter-store
//!
//! Storage core of the page-view counter service.
//!
//! Wraps a Redis-compatible key-value store with the counter service's
//! storage policy: every read slides the key's TTL forward, counters are
//! incremented and refreshed in one pipelined round trip, and the keyspace
//! is only ever enumerated with cursor scans. On top of that sit namespace
//! ownership (hashed secrets), best-effort call metering, and the counter
//! operations themselves.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  CounterService  (get/create/incr/reset/del) │
//! ├──────────────────────┬──────────────────────┤
//! │  NamespaceAuth       │  CallMeter           │
//! │  (HMAC-SHA256, NX)   │  (call@<method>)     │
//! ├──────────────────────┴──────────────────────┤
//! │  KeyValueService  (sliding TTL, KeyScan)    │
//! ├─────────────────────────────────────────────┤
//! │  StoreClient  (url, ping, Arc<dyn KvBackend>)│
//! │  RedisBackend │ MemoryBackend               │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use counter_store::{CounterService, StoreClient, StoreConfig};
//!
//! let config = StoreConfig::load("counter.toml")?;
//! let client = StoreClient::connect(&config.url).await?;
//! let counters = CounterService::new(client, &config);
//!
//! counters.create("blog", Some("s3cret")).await?;
//! let hit = counters.increment("blog", "s3cret", "home").await?;
//! ```

pub mod auth;
pub mod backend;
pub mod client;
pub mod config;
pub mod counter;
pub mod error;
pub mod glob;
pub mod keys;
pub mod kv;
pub mod metering;
pub mod scan;

// ── re-exports ───────────────────────────────────────────────────────

pub use auth::{NamespaceAuth, SecretHasher};
pub use backend::{Command, KvBackend, MemoryBackend, Pipeline, RedisBackend, Reply, ScanPage};
pub use client::{ConnectionTarget, Scheme, StoreClient};
pub use config::StoreConfig;
pub use counter::CounterService;
pub use error::{StoreError, StoreResult};
pub use kv::{KeyValue, KeyValueService, KvSettings};
pub use metering::CallMeter;
pub use scan::KeyScan;
