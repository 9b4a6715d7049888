//! Backend trait and pipeline types.
//!
//! Every backing store (Redis, in-process memory) implements [`KvBackend`],
//! a deliberately small, Redis-shaped command surface. The key-value service
//! composes these primitives into sliding-TTL semantics; backends never know
//! about namespaces or TTL policy.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};

pub use self::memory::MemoryBackend;
pub use self::redis::RedisBackend;

/// The error every backend reports when an increment would leave the `i64`
/// range. The stored value is left unchanged.
pub(crate) fn overflow_error(key: &str) -> StoreError {
    StoreError::InvalidArgument(format!("increment of key[{key}] would overflow"))
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A single command inside a [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `GET key`; replies [`Reply::Value`].
    Get { key: String },
    /// `INCRBY key by`; replies [`Reply::Integer`].
    IncrBy { key: String, by: i64 },
    /// `PEXPIRE key ttl`; replies [`Reply::Flag`] (false if the key is absent).
    Expire { key: String, ttl: Duration },
}

/// The reply to one [`Command`], in the same position as the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Value(Option<String>),
    Integer(i64),
    Flag(bool),
}

/// An ordered batch of commands sent in one round trip.
///
/// Pipelines are not transactional: a failing command aborts the caller's
/// view of the batch, but commands that already ran are not rolled back.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    commands: Vec<Command>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commands: Vec::with_capacity(capacity),
        }
    }

    pub fn get(&mut self, key: impl Into<String>) -> &mut Self {
        self.commands.push(Command::Get { key: key.into() });
        self
    }

    pub fn incr_by(&mut self, key: impl Into<String>, by: i64) -> &mut Self {
        self.commands.push(Command::IncrBy {
            key: key.into(),
            by,
        });
        self
    }

    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.commands.push(Command::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// One page of a cursor scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next request; `0` means the scan is complete.
    pub cursor: u64,
    /// Keys matched on this page. May be empty even when `cursor != 0`.
    pub keys: Vec<String>,
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// The command surface a backing key-value store must provide.
///
/// Implementations must be safe to share across tasks: the store client
/// hands out one `Arc<dyn KvBackend>` to every caller.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Short backend name for logs (`redis`, `memory`).
    fn name(&self) -> &'static str;

    /// Round-trip liveness check.
    async fn ping(&self) -> StoreResult<()>;

    /// Value at `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Unconditional write. `ttl = None` stores the value without expiry,
    /// clearing any previous one.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Write only if `key` is absent. Returns whether the value was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>)
    -> StoreResult<bool>;

    /// Reset the expiry of `key`. Returns false if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Remaining lifetime; `None` for absent keys and keys without expiry.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Remove `keys`, returning how many existed.
    async fn delete(&self, keys: &[String]) -> StoreResult<i64>;

    /// Run every command of `pipeline` in one round trip.
    ///
    /// On success the replies are positionally aligned with the commands.
    /// An `INCRBY` on a non-integer value must surface as
    /// [`crate::StoreError::TypeMismatch`].
    async fn execute(&self, pipeline: &Pipeline) -> StoreResult<Vec<Reply>>;

    /// One bounded scan step over keys matching the glob `pattern`.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage>;
}
