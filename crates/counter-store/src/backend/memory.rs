//! In-process backend with Redis-compatible TTL and scan semantics.
//!
//! Entries live in a `BTreeMap` behind a single mutex, so every call,
//! including a whole pipeline, observes and mutates a consistent snapshot.
//! Expired entries are purged lazily on access.
//!
//! Scan cursors name the last key a page examined, so a scan resumes after
//! that key however many earlier keys expired or were deleted in between.
//! Like Redis, a page examines up to `count` keys and returns the matching
//! subset, so pages may be empty before the scan completes.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::trace;

use super::{Command, KvBackend, Pipeline, Reply, ScanPage, overflow_error};
use crate::error::{StoreError, StoreResult};
use crate::glob::GlobPattern;

/// Resume positions kept for unfinished scans; the oldest is evicted first.
const MAX_OPEN_CURSORS: usize = 1024;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Map = BTreeMap<String, Entry>;

#[derive(Debug, Default)]
struct State {
    entries: Map,
    /// Cursor id to the last key examined by the page that issued it.
    cursors: BTreeMap<u64, String>,
    last_cursor: u64,
}

impl State {
    fn issue_cursor(&mut self, resume_after: String) -> u64 {
        // Ids start at 1; 0 is reserved for "scan complete".
        self.last_cursor = self.last_cursor.checked_add(1).unwrap_or(1);
        self.cursors.insert(self.last_cursor, resume_after);
        while self.cursors.len() > MAX_OPEN_CURSORS {
            self.cursors.pop_first();
        }
        self.last_cursor
    }
}

/// Thread-safe in-memory key-value store.
///
/// `Clone` shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        match self.lock() {
            Ok(mut state) => {
                purge_expired(&mut state.entries);
                state.entries.len()
            }
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| StoreError::Transient(format!("mutex poisoned: {e}")))
    }
}

fn purge_if_expired(map: &mut Map, key: &str) {
    let now = Instant::now();
    if map.get(key).is_some_and(|e| e.is_expired(now)) {
        map.remove(key);
    }
}

/// The live entry at `key`, removing it first if it has expired.
fn live<'a>(map: &'a mut Map, key: &str) -> Option<&'a mut Entry> {
    purge_if_expired(map, key);
    map.get_mut(key)
}

fn purge_expired(map: &mut Map) {
    let now = Instant::now();
    map.retain(|_, entry| !entry.is_expired(now));
}

/// Parse `raw` the way Redis `INCR` does: an optional `-`, then digits with
/// no leading zero, no `+`, no whitespace, and no `-0`.
fn parse_redis_integer(raw: &str) -> Option<i64> {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    let canonical = match digits.as_bytes() {
        [] => false,
        [b'0'] => digits.len() == raw.len(),
        [first, rest @ ..] => {
            (b'1'..=b'9').contains(first) && rest.iter().all(u8::is_ascii_digit)
        }
    };
    if !canonical {
        return None;
    }
    raw.parse().ok()
}

fn incr_by(map: &mut Map, key: &str, by: i64) -> StoreResult<i64> {
    purge_if_expired(map, key);
    let entry = map
        .entry(key.to_string())
        .or_insert_with(|| Entry::new("0".to_string(), None));
    let current = parse_redis_integer(&entry.value)
        .ok_or_else(|| StoreError::TypeMismatch { key: key.to_string() })?;
    let next = current.checked_add(by).ok_or_else(|| overflow_error(key))?;
    // Redis keeps the existing expiry across INCR.
    entry.value = next.to_string();
    Ok(next)
}

fn expire(map: &mut Map, key: &str, ttl: Duration) -> bool {
    match live(map, key) {
        Some(entry) => {
            entry.expires_at = Some(Instant::now() + ttl);
            true
        }
        None => false,
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        self.lock().map(|_| ())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut state = self.lock()?;
        Ok(live(&mut state.entries, key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut state = self.lock()?;
        state
            .entries
            .insert(key.to_string(), Entry::new(value.to_string(), ttl));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let mut state = self.lock()?;
        let map = &mut state.entries;
        if live(map, key).is_some() {
            return Ok(false);
        }
        map.insert(key.to_string(), Entry::new(value.to_string(), ttl));
        Ok(true)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut state = self.lock()?;
        Ok(expire(&mut state.entries, key, ttl))
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut state = self.lock()?;
        let now = Instant::now();
        Ok(live(&mut state.entries, key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<i64> {
        let mut state = self.lock()?;
        let map = &mut state.entries;
        let mut removed = 0;
        for key in keys {
            if live(map, key).is_some() {
                map.remove(key.as_str());
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn execute(&self, pipeline: &Pipeline) -> StoreResult<Vec<Reply>> {
        let mut state = self.lock()?;
        let map = &mut state.entries;
        let mut replies = Vec::with_capacity(pipeline.len());
        // Commands run in order; an error stops the batch without undoing
        // the commands before it.
        for command in pipeline.commands() {
            let reply = match command {
                Command::Get { key } => Reply::Value(live(map, key).map(|e| e.value.clone())),
                Command::IncrBy { key, by } => Reply::Integer(incr_by(map, key, *by)?),
                Command::Expire { key, ttl } => Reply::Flag(expire(map, key, *ttl)),
            };
            replies.push(reply);
        }
        trace!(commands = pipeline.len(), "memory pipeline executed");
        Ok(replies)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage> {
        let glob = GlobPattern::compile(pattern)?;
        let mut guard = self.lock()?;
        let state = &mut *guard;
        purge_expired(&mut state.entries);

        let lower = if cursor == 0 {
            Bound::Unbounded
        } else {
            let resume_after = state.cursors.get(&cursor).ok_or_else(|| {
                StoreError::InvalidArgument(format!("unknown scan cursor {cursor}"))
            })?;
            Bound::Excluded(resume_after.clone())
        };

        let mut examined = state
            .entries
            .range::<String, _>((lower, Bound::Unbounded))
            .map(|(key, _)| key);
        let mut keys = Vec::new();
        let mut last = None;
        for key in examined.by_ref().take(count.max(1)) {
            if glob.matches(key) {
                keys.push(key.clone());
            }
            last = Some(key.clone());
        }
        let more = examined.next().is_some();

        let cursor = match last {
            Some(last) if more => state.issue_cursor(last),
            _ => 0,
        };
        Ok(ScanPage { cursor, keys })
    }
}
