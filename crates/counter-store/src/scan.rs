//! Cursor-driven key enumeration as a lazy stream of pages.
//!
//! [`KeyScan`] hides cursor bookkeeping: each poll issues one bounded
//! `SCAN` round trip and yields the keys it matched. The stream ends after
//! the page whose cursor comes back as `0`. A failed page yields a single
//! [`StoreError::Scan`] and then ends. To restart, request a new scan.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{self, BoxStream, Stream, StreamExt};

use crate::backend::KvBackend;
use crate::error::{StoreError, StoreResult};

enum State {
    Next(u64),
    Done,
}

/// A finite stream of scan pages for one pattern.
pub struct KeyScan {
    pattern: String,
    inner: BoxStream<'static, StoreResult<Vec<String>>>,
}

impl KeyScan {
    pub(crate) fn new(
        backend: Arc<dyn KvBackend>,
        pattern: String,
        page_size: usize,
        op_timeout: Duration,
    ) -> Self {
        let shared_pattern = pattern.clone();
        let inner = stream::unfold(State::Next(0), move |state| {
            let backend = Arc::clone(&backend);
            let pattern = shared_pattern.clone();
            async move {
                let cursor = match state {
                    State::Next(cursor) => cursor,
                    State::Done => return None,
                };
                let step = tokio::time::timeout(op_timeout, backend.scan(cursor, &pattern, page_size));
                let page = match step.await {
                    Ok(Ok(page)) => page,
                    Ok(Err(e)) => return Some((Err(scan_error(&pattern, e)), State::Done)),
                    Err(_) => {
                        let reason = format!("page timed out after {op_timeout:?}");
                        return Some((
                            Err(StoreError::Scan { pattern, reason }),
                            State::Done,
                        ));
                    }
                };
                let next = if page.cursor == 0 {
                    State::Done
                } else {
                    State::Next(page.cursor)
                };
                Some((Ok(page.keys), next))
            }
        })
        .boxed();

        Self { pattern, inner }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Drain the stream, returning every matched key once, in first-seen
    /// order. Redis may return a key on more than one page.
    pub async fn collect_keys(mut self) -> StoreResult<Vec<String>> {
        let mut seen = std::collections::HashSet::new();
        let mut keys = Vec::new();
        while let Some(page) = self.next().await {
            for key in page? {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }
}

fn scan_error(pattern: &str, err: StoreError) -> StoreError {
    match err {
        already @ StoreError::Scan { .. } => already,
        other => StoreError::Scan {
            pattern: pattern.to_string(),
            reason: other.to_string(),
        },
    }
}

impl Stream for KeyScan {
    type Item = StoreResult<Vec<String>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use futures::TryStreamExt;

    use super::*;
    use crate::backend::{MemoryBackend, Pipeline, Reply, ScanPage};

    fn scan_of(backend: Arc<dyn KvBackend>, pattern: &str, page: usize) -> KeyScan {
        KeyScan::new(backend, pattern.to_string(), page, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn pages_are_bounded_and_complete() {
        let memory = MemoryBackend::new();
        for i in 0..12 {
            memory.set(&format!("p{i}"), "v", None).await.unwrap();
        }

        let pages: Vec<Vec<String>> = scan_of(Arc::new(memory), "p*", 5)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(pages.len(), 3);
        assert!(pages.iter().all(|p| p.len() <= 5));
        assert_eq!(pages.iter().map(Vec::len).sum::<usize>(), 12);
    }

    #[tokio::test]
    async fn empty_keyspace_yields_one_empty_page() {
        let pages: Vec<Vec<String>> = scan_of(Arc::new(MemoryBackend::new()), "*", 10)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(pages, vec![Vec::<String>::new()]);
    }

    /// Returns the same key on two pages, then either finishes or fails.
    struct ScriptedScan {
        fail_at_end: bool,
    }

    #[async_trait]
    impl KvBackend for ScriptedScan {
        fn name(&self) -> &'static str {
            "scripted"
        }
        async fn ping(&self) -> StoreResult<()> {
            Ok(())
        }
        async fn get(&self, _: &str) -> StoreResult<Option<String>> {
            Ok(None)
        }
        async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> StoreResult<()> {
            Ok(())
        }
        async fn set_if_absent(&self, _: &str, _: &str, _: Option<Duration>) -> StoreResult<bool> {
            Ok(true)
        }
        async fn expire(&self, _: &str, _: Duration) -> StoreResult<bool> {
            Ok(true)
        }
        async fn ttl(&self, _: &str) -> StoreResult<Option<Duration>> {
            Ok(None)
        }
        async fn delete(&self, _: &[String]) -> StoreResult<i64> {
            Ok(0)
        }
        async fn execute(&self, _: &Pipeline) -> StoreResult<Vec<Reply>> {
            Ok(Vec::new())
        }
        async fn scan(&self, cursor: u64, _: &str, _: usize) -> StoreResult<ScanPage> {
            match cursor {
                0 => Ok(ScanPage {
                    cursor: 7,
                    keys: vec!["a".into(), "b".into()],
                }),
                7 => Ok(ScanPage {
                    cursor: 9,
                    keys: vec!["b".into(), "c".into()],
                }),
                _ if self.fail_at_end => Err(StoreError::Transient("connection reset".into())),
                _ => Ok(ScanPage {
                    cursor: 0,
                    keys: vec!["c".into(), "d".into()],
                }),
            }
        }
    }

    #[tokio::test]
    async fn failure_ends_the_stream_with_scan_error() {
        let mut scan = scan_of(Arc::new(ScriptedScan { fail_at_end: true }), "*", 10);
        assert_eq!(scan.next().await.unwrap().unwrap().len(), 2);
        assert_eq!(scan.next().await.unwrap().unwrap().len(), 2);
        let err = scan.next().await.unwrap().unwrap_err();
        assert!(matches!(err, StoreError::Scan { ref pattern, .. } if pattern == "*"));
        assert!(scan.next().await.is_none());
    }

    #[tokio::test]
    async fn collect_keys_removes_duplicates() {
        let keys = scan_of(Arc::new(ScriptedScan { fail_at_end: false }), "*", 10)
            .collect_keys()
            .await
            .unwrap();
        assert_eq!(keys, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn collect_keys_propagates_errors() {
        let err = scan_of(Arc::new(ScriptedScan { fail_at_end: true }), "*", 10)
            .collect_keys()
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Scan { .. }));
    }
}
