//! Sliding-TTL key-value service.
//!
//! [`KeyValueService`] layers the counter store's storage policy on top of a
//! [`StoreClient`]:
//!
//! - **Reads extend lifetime.** A successful [`KeyValueService::get`] resets
//!   the key's TTL to the full window before returning; if that refresh fails
//!   the read fails too. [`KeyValueService::peek`] is the side-effect-free
//!   alternative.
//! - **Counters are pipelined.** [`KeyValueService::incr`] sends the increment
//!   and the TTL refresh in one round trip.
//! - **Batches never fail on a missing key.** [`KeyValueService::batch_get`]
//!   resolves absent keys to the empty string; only a transport failure
//!   aborts the batch.
//! - **Enumeration is bounded.** Prefix matching always walks the keyspace
//!   with `SCAN` pages, never `KEYS`.
//!
//! Every backend round trip is bounded by [`KvSettings::op_timeout`].
//! Reads and [`KeyValueService::set`] are safe to retry after a timeout;
//! [`KeyValueService::incr`] is not, because the increment may already have
//! been applied.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, instrument};

use crate::backend::{KvBackend, Pipeline, Reply};
use crate::client::StoreClient;
use crate::config::{DEFAULT_KEY_TTL_SECS, DEFAULT_OP_TIMEOUT_MS, DEFAULT_SCAN_PAGE_SIZE};
use crate::error::{StoreError, StoreResult};
use crate::scan::KeyScan;

// ── settings ─────────────────────────────────────────────────────────

/// Tunables of the key-value layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KvSettings {
    /// Sliding TTL window applied on writes and refreshed on reads.
    pub key_ttl: Duration,
    /// `COUNT` hint for each scan page.
    pub scan_page_size: usize,
    /// Deadline for one backend round trip.
    pub op_timeout: Duration,
}

impl Default for KvSettings {
    fn default() -> Self {
        Self {
            key_ttl: Duration::from_secs(DEFAULT_KEY_TTL_SECS),
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
            op_timeout: Duration::from_millis(DEFAULT_OP_TIMEOUT_MS),
        }
    }
}

// ── results ──────────────────────────────────────────────────────────

/// A key and the value read for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

// ── service ──────────────────────────────────────────────────────────

/// Key-value operations with sliding-TTL semantics.
///
/// Cheap to clone; clones share the same store client.
#[derive(Debug, Clone)]
pub struct KeyValueService {
    client: StoreClient,
    settings: KvSettings,
}

impl KeyValueService {
    pub fn new(client: StoreClient, settings: KvSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &KvSettings {
        &self.settings
    }

    pub fn client(&self) -> &StoreClient {
        &self.client
    }

    /// Run one backend round trip under the operation deadline.
    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        let after = self.settings.op_timeout;
        tokio::time::timeout(after, fut)
            .await
            .map_err(|_| StoreError::Timeout { op, after })?
    }

    /// Read `key` and extend its lifetime to the full TTL window.
    ///
    /// This read has a side effect: on success the key's TTL is reset, so a
    /// previously permanent key becomes expiring. Use [`Self::peek`] for
    /// permanent records.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the key is absent or expired.
    /// - [`StoreError::EmptyValue`] if it holds the empty string.
    /// - [`StoreError::Refresh`] if the value was read but the TTL refresh
    ///   failed or the key vanished before it.
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> StoreResult<String> {
        let backend = self.client.backend();
        let value = self
            .bounded("get", backend.get(key))
            .await?
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })?;
        if value.is_empty() {
            return Err(StoreError::EmptyValue {
                key: key.to_string(),
            });
        }

        let refreshed = self
            .bounded("expire", backend.expire(key, self.settings.key_ttl))
            .await
            .map_err(|e| StoreError::Refresh {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        if !refreshed {
            return Err(StoreError::Refresh {
                key: key.to_string(),
                reason: "key vanished before its ttl was refreshed".into(),
            });
        }

        debug!(key, "get ok, ttl refreshed");
        Ok(value)
    }

    /// Read `key` without touching its TTL. Absent keys are `None`.
    pub async fn peek(&self, key: &str) -> StoreResult<Option<String>> {
        self.bounded("peek", self.client.backend().get(key)).await
    }

    /// Remaining lifetime of `key`; `None` if absent or permanent.
    pub async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.bounded("ttl", self.client.backend().ttl(key)).await
    }

    fn window(&self, use_ttl: bool) -> Option<Duration> {
        use_ttl.then_some(self.settings.key_ttl)
    }

    /// Write `value` unconditionally, with the sliding window if `use_ttl`,
    /// permanently otherwise.
    #[instrument(skip(self, value))]
    pub async fn set(&self, key: &str, value: &str, use_ttl: bool) -> StoreResult<()> {
        self.bounded("set", self.client.backend().set(key, value, self.window(use_ttl)))
            .await?;
        debug!(key, use_ttl, "set ok");
        Ok(())
    }

    /// Write `value` only if `key` does not exist. Returns whether it was
    /// written.
    #[instrument(skip(self, value))]
    pub async fn set_if_absent(&self, key: &str, value: &str, use_ttl: bool) -> StoreResult<bool> {
        let ttl = self.window(use_ttl);
        self.bounded("set_if_absent", self.client.backend().set_if_absent(key, value, ttl))
            .await
    }

    /// Atomically increment the integer at `key` and refresh its TTL.
    ///
    /// A missing key counts from 0. Not safe to retry after a timeout.
    ///
    /// # Errors
    ///
    /// - [`StoreError::TypeMismatch`] if the stored value is not an integer.
    /// - [`StoreError::InvalidArgument`] if the increment would overflow.
    ///
    /// In both cases the value is left unchanged.
    #[instrument(skip(self))]
    pub async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut pipe = Pipeline::with_capacity(2);
        pipe.incr_by(key, 1).expire(key, self.settings.key_ttl);

        let replies = self
            .bounded("incr", self.client.backend().execute(&pipe))
            .await
            .map_err(|e| match e {
                mismatch @ StoreError::TypeMismatch { .. } => mismatch,
                overflow @ StoreError::InvalidArgument(_) => overflow,
                timeout @ StoreError::Timeout { .. } => timeout,
                other => StoreError::Transient(format!("incr key[{key}] failed: {other}")),
            })?;

        match replies.first() {
            Some(Reply::Integer(value)) => {
                debug!(key, value, "incr ok");
                Ok(*value)
            }
            other => Err(StoreError::Transient(format!(
                "incr key[{key}] returned unexpected reply {other:?}"
            ))),
        }
    }

    /// Read every key in one pipelined round trip, refreshing each TTL.
    ///
    /// The result is aligned with `keys`. Missing keys yield an empty value.
    ///
    /// # Errors
    ///
    /// [`StoreError::Pipeline`] if the round trip fails; no partial result is
    /// returned, although refreshes that already ran are not undone.
    #[instrument(skip(self, keys), fields(count = keys.len()))]
    pub async fn batch_get(&self, keys: &[String]) -> StoreResult<Vec<KeyValue>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = Pipeline::with_capacity(keys.len() * 2);
        for key in keys {
            pipe.get(key.as_str()).expire(key.as_str(), self.settings.key_ttl);
        }

        let replies = self
            .bounded("batch_get", self.client.backend().execute(&pipe))
            .await
            .map_err(|e| StoreError::Pipeline {
                reason: e.to_string(),
            })?;

        // Replies alternate value/flag; take every value reply.
        let values: Vec<Option<String>> = replies
            .into_iter()
            .step_by(2)
            .map(|reply| match reply {
                Reply::Value(value) => Ok(value),
                other => Err(StoreError::Pipeline {
                    reason: format!("unexpected reply {other:?} to GET"),
                }),
            })
            .collect::<StoreResult<_>>()?;
        if values.len() != keys.len() {
            return Err(StoreError::Pipeline {
                reason: format!("expected {} values, got {}", keys.len(), values.len()),
            });
        }

        Ok(keys
            .iter()
            .zip(values)
            .map(|(key, value)| KeyValue {
                key: key.clone(),
                value: value.unwrap_or_default(),
            })
            .collect())
    }

    /// Remove `keys`, returning how many existed. Absent keys count 0.
    #[instrument(skip(self, keys), fields(count = keys.len()))]
    pub async fn delete(&self, keys: &[String]) -> StoreResult<i64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self
            .bounded("delete", self.client.backend().delete(keys))
            .await?;
        debug!(removed, "delete ok");
        Ok(removed)
    }

    /// Lazily enumerate keys matching the glob `pattern`, one bounded page
    /// per round trip.
    pub fn scan_prefix(&self, pattern: &str) -> KeyScan {
        KeyScan::new(
            std::sync::Arc::clone(self.client.backend()),
            pattern.to_string(),
            self.settings.scan_page_size,
            self.settings.op_timeout,
        )
    }

    /// Every key matching the glob `pattern`, each reported once.
    ///
    /// The result is assembled across several round trips: keys created or
    /// deleted during the scan may or may not appear.
    #[instrument(skip(self))]
    pub async fn get_prefix_match_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let keys = self.scan_prefix(pattern).collect_keys().await?;
        debug!(pattern, found = keys.len(), "prefix scan complete");
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::backend::{MemoryBackend, ScanPage};

    #[derive(Debug, Clone, Copy)]
    enum Fault {
        ExpireFails,
        ExpireFindsNothing,
        PipelineFails,
    }

    /// A [`MemoryBackend`] with one injected failure.
    struct FaultyBackend {
        inner: MemoryBackend,
        fault: Fault,
    }

    #[async_trait]
    impl KvBackend for FaultyBackend {
        fn name(&self) -> &'static str {
            "faulty"
        }
        async fn ping(&self) -> StoreResult<()> {
            self.inner.ping().await
        }
        async fn get(&self, key: &str) -> StoreResult<Option<String>> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
            self.inner.set(key, value, ttl).await
        }
        async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<bool> {
            self.inner.set_if_absent(key, value, ttl).await
        }
        async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
            match self.fault {
                Fault::ExpireFails => Err(StoreError::Transient("connection reset".into())),
                Fault::ExpireFindsNothing => Ok(false),
                Fault::PipelineFails => self.inner.expire(key, ttl).await,
            }
        }
        async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
            self.inner.ttl(key).await
        }
        async fn delete(&self, keys: &[String]) -> StoreResult<i64> {
            self.inner.delete(keys).await
        }
        async fn execute(&self, pipeline: &Pipeline) -> StoreResult<Vec<Reply>> {
            match self.fault {
                Fault::PipelineFails => Err(StoreError::Transient("broken pipe".into())),
                _ => self.inner.execute(pipeline).await,
            }
        }
        async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage> {
            self.inner.scan(cursor, pattern, count).await
        }
    }

    async fn faulty_service(fault: Fault, seed: &[(&str, &str)]) -> KeyValueService {
        let inner = MemoryBackend::new();
        for (key, value) in seed {
            inner.set(key, value, Some(Duration::from_secs(60))).await.unwrap();
        }
        let client = StoreClient::from_backend(Arc::new(FaultyBackend { inner, fault }), "faulty://");
        KeyValueService::new(client, KvSettings::default())
    }

    fn service() -> KeyValueService {
        KeyValueService::new(StoreClient::in_memory(), KvSettings::default())
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let kv = service();
        let err = kv.get("hello").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { ref key } if key == "hello"));
    }

    #[tokio::test]
    async fn get_empty_is_empty_value() {
        let kv = service();
        kv.set("blank", "", true).await.unwrap();
        assert!(matches!(
            kv.get("blank").await.unwrap_err(),
            StoreError::EmptyValue { .. }
        ));
    }

    #[tokio::test]
    async fn set_then_get() {
        let kv = service();
        kv.set("test", "yes", true).await.unwrap();
        assert_eq!(kv.get("test").await.unwrap(), "yes");
    }

    #[tokio::test]
    async fn get_refreshes_ttl() {
        let memory = MemoryBackend::new();
        let client = StoreClient::from_backend(Arc::new(memory.clone()), "memory://");
        let kv = KeyValueService::new(client, KvSettings::default());

        kv.set("k", "v", true).await.unwrap();
        memory.expire("k", Duration::from_secs(10)).await.unwrap();
        assert!(kv.ttl("k").await.unwrap().unwrap() <= Duration::from_secs(10));

        kv.get("k").await.unwrap();
        let ttl = kv.ttl("k").await.unwrap().unwrap();
        assert!(ttl > kv.settings().key_ttl - Duration::from_secs(5));
    }

    #[tokio::test]
    async fn peek_leaves_ttl_alone() {
        let kv = service();
        kv.set("perm", "v", false).await.unwrap();
        assert_eq!(kv.peek("perm").await.unwrap().as_deref(), Some("v"));
        assert_eq!(kv.ttl("perm").await.unwrap(), None);
        assert_eq!(kv.peek("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn permanent_set_has_no_ttl() {
        let kv = service();
        kv.set("n", "v", true).await.unwrap();
        kv.set("n", "v", false).await.unwrap();
        assert_eq!(kv.ttl("n").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_counts_from_zero_and_sets_ttl() {
        let kv = service();
        assert_eq!(kv.incr("fresh").await.unwrap(), 1);
        assert_eq!(kv.incr("fresh").await.unwrap(), 2);
        assert_eq!(kv.incr("fresh").await.unwrap(), 3);
        assert!(kv.ttl("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn incr_after_set_zero() {
        let kv = service();
        kv.set("counter", "0", true).await.unwrap();
        assert_eq!(kv.incr("counter").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn incr_on_text_is_type_mismatch_and_keeps_value() {
        let kv = service();
        kv.set("s", "yes", true).await.unwrap();
        let err = kv.incr("s").await.unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { ref key } if key == "s"));
        assert_eq!(kv.get("s").await.unwrap(), "yes");
    }

    #[tokio::test]
    async fn batch_get_aligns_and_fills_missing() {
        let kv = service();
        kv.set("a", "1", true).await.unwrap();
        kv.set("c", "3", true).await.unwrap();

        let keys: Vec<String> = ["a", "b", "c"].iter().map(|k| k.to_string()).collect();
        let values = kv.batch_get(&keys).await.unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[0].value, "1");
        assert_eq!(values[1].key, "b");
        assert_eq!(values[1].value, "");
        assert_eq!(values[2].value, "3");
    }

    #[tokio::test]
    async fn batch_get_empty_input() {
        assert!(service().batch_get(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_counts_existing_keys() {
        let kv = service();
        kv.set("counter", "1", true).await.unwrap();
        kv.set("test", "yes", true).await.unwrap();

        assert_eq!(kv.delete(&["missing".to_string()]).await.unwrap(), 0);
        assert_eq!(
            kv.delete(&["counter".to_string(), "test".to_string()])
                .await
                .unwrap(),
            2
        );
        assert!(matches!(
            kv.get("test").await.unwrap_err(),
            StoreError::NotFound { .. }
        ));
        assert_eq!(kv.delete(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn prefix_scan_finds_all_33_keys() {
        let kv = service();
        for i in 0..33 {
            kv.set(&format!("key{i}"), "value", true).await.unwrap();
        }
        kv.set("other", "value", true).await.unwrap();

        let mut keys = kv.get_prefix_match_keys("key*").await.unwrap();
        assert_eq!(keys.len(), 33);
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 33);
    }

    #[tokio::test]
    async fn prefix_scan_is_independent_of_page_size() {
        for page in [1, 3, 10, 100] {
            let settings = KvSettings {
                scan_page_size: page,
                ..KvSettings::default()
            };
            let kv = KeyValueService::new(StoreClient::in_memory(), settings);
            for i in 0..33 {
                kv.set(&format!("key{i}"), "v", false).await.unwrap();
            }
            assert_eq!(kv.get_prefix_match_keys("key*").await.unwrap().len(), 33);
        }
    }

    #[tokio::test]
    async fn expired_keys_are_not_found() {
        let settings = KvSettings {
            key_ttl: Duration::from_millis(20),
            ..KvSettings::default()
        };
        let kv = KeyValueService::new(StoreClient::in_memory(), settings);
        kv.set("short", "v", true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(matches!(
            kv.get("short").await.unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn get_fails_when_refresh_fails() {
        let kv = faulty_service(Fault::ExpireFails, &[("k", "v")]).await;
        let err = kv.get("k").await.unwrap_err();
        assert!(
            matches!(err, StoreError::Refresh { ref key, ref reason } if key == "k" && reason.contains("connection reset")),
            "got {err:?}"
        );
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn get_fails_when_key_vanishes_before_refresh() {
        let kv = faulty_service(Fault::ExpireFindsNothing, &[("k", "v")]).await;
        let err = kv.get("k").await.unwrap_err();
        assert!(
            matches!(err, StoreError::Refresh { ref reason, .. } if reason.contains("vanished")),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn peek_ignores_refresh_failures() {
        let kv = faulty_service(Fault::ExpireFails, &[("k", "v")]).await;
        assert_eq!(kv.peek("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn batch_get_transport_failure_is_pipeline_error() {
        let kv = faulty_service(Fault::PipelineFails, &[("a", "1")]).await;
        let err = kv.batch_get(&["a".to_string()]).await.unwrap_err();
        assert!(
            matches!(err, StoreError::Pipeline { ref reason } if reason.contains("broken pipe")),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn batch_get_refreshes_every_ttl() {
        let memory = MemoryBackend::new();
        let client = StoreClient::from_backend(Arc::new(memory.clone()), "memory://");
        let kv = KeyValueService::new(client, KvSettings::default());
        for key in ["a", "b"] {
            kv.set(key, "1", true).await.unwrap();
            memory.expire(key, Duration::from_secs(5)).await.unwrap();
        }

        kv.batch_get(&["a".to_string(), "b".to_string()]).await.unwrap();
        for key in ["a", "b"] {
            let ttl = kv.ttl(key).await.unwrap().unwrap();
            assert!(ttl > Duration::from_secs(60), "{key} ttl {ttl:?} was not refreshed");
        }
    }

    #[tokio::test]
    async fn incr_overflow_is_invalid_argument() {
        let kv = service();
        kv.set("big", &i64::MAX.to_string(), true).await.unwrap();
        assert!(matches!(
            kv.incr("big").await.unwrap_err(),
            StoreError::InvalidArgument(_)
        ));
        assert_eq!(kv.peek("big").await.unwrap(), Some(i64::MAX.to_string()));
    }
}
