//! Store client: the single shared handle to the backing store.
//!
//! [`StoreClient::connect`] validates the connection URL, opens the backend,
//! and performs a `PING` so misconfiguration fails at startup instead of on
//! the first request. The resulting handle is `Clone + Send + Sync` and is
//! passed by value into every service that needs storage.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use url::Url;

use crate::backend::{KvBackend, MemoryBackend, RedisBackend};
use crate::error::{StoreError, StoreResult};

/// Upper bound on establishing the initial connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_REDIS_PORT: u16 = 6379;

/// Which kind of backend a URL selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Redis,
    RedisTls,
    Memory,
}

/// A parsed and validated connection URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub scheme: Scheme,
    pub host: Option<String>,
    pub port: u16,
    pub db: i64,
    /// The URL with any password replaced by `***`; safe to log.
    pub redacted: String,
    url: String,
}

impl ConnectionTarget {
    /// Parse `scheme://[:password@]host:port/db-index`.
    ///
    /// `memory://` needs no host. Every failure is a
    /// [`StoreError::Connection`] carrying the redacted URL.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let parsed = Url::parse(raw).map_err(|e| StoreError::Connection {
            url: redact_unparsable(raw),
            reason: format!("malformed url: {e}"),
        })?;
        let redacted = redact(&parsed);
        let fail = |reason: String| StoreError::Connection {
            url: redacted.clone(),
            reason,
        };

        let scheme = match parsed.scheme() {
            "redis" => Scheme::Redis,
            "rediss" => Scheme::RedisTls,
            "memory" => Scheme::Memory,
            other => return Err(fail(format!("unsupported scheme {other:?}"))),
        };

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .map(str::to_string);
        if scheme != Scheme::Memory && host.is_none() {
            return Err(fail("missing host".into()));
        }

        let db = match parsed.path().trim_start_matches('/') {
            "" => 0,
            index => index
                .parse::<i64>()
                .ok()
                .filter(|db| *db >= 0)
                .ok_or_else(|| fail(format!("db index must be a non-negative integer, got {index:?}")))?,
        };

        Ok(Self {
            scheme,
            host,
            port: parsed.port().unwrap_or(DEFAULT_REDIS_PORT),
            db,
            redacted,
            url: raw.to_string(),
        })
    }
}

fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    if shown.password().is_some_and(|p| !p.is_empty()) {
        // Only fails for cannot-be-a-base URLs, which have no password.
        let _ = shown.set_password(Some("***"));
    }
    shown.to_string()
}

/// Best-effort redaction for strings `Url` refuses to parse.
fn redact_unparsable(raw: &str) -> String {
    match (raw.find("://"), raw.rfind('@')) {
        (Some(start), Some(at)) if at > start => format!("{}://***@{}", &raw[..start], &raw[at + 1..]),
        _ => raw.to_string(),
    }
}

/// Shared, cloneable handle to the backing key-value store.
#[derive(Clone)]
pub struct StoreClient {
    backend: Arc<dyn KvBackend>,
    endpoint: String,
}

impl std::fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreClient")
            .field("backend", &self.backend.name())
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl StoreClient {
    /// Validate `url`, connect, and verify the connection with a `PING`.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let target = ConnectionTarget::parse(url)?;
        info!(url = %target.redacted, "connecting to store");

        let backend: Arc<dyn KvBackend> = match target.scheme {
            Scheme::Memory => Arc::new(MemoryBackend::new()),
            Scheme::Redis | Scheme::RedisTls => {
                let connecting = RedisBackend::connect(&target.url);
                let backend = tokio::time::timeout(CONNECT_TIMEOUT, connecting)
                    .await
                    .map_err(|_| StoreError::Connection {
                        url: target.redacted.clone(),
                        reason: format!("timed out after {CONNECT_TIMEOUT:?}"),
                    })?
                    .map_err(|e| StoreError::Connection {
                        url: target.redacted.clone(),
                        reason: e.to_string(),
                    })?;
                Arc::new(backend)
            }
        };

        let client = Self {
            backend,
            endpoint: target.redacted.clone(),
        };
        client.ping().await.map_err(|e| StoreError::Connection {
            url: target.redacted.clone(),
            reason: e.to_string(),
        })?;
        info!(url = %target.redacted, db = target.db, "store connected");
        Ok(client)
    }

    /// A client over a fresh, empty [`MemoryBackend`].
    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(MemoryBackend::new()), "memory://")
    }

    /// Wrap an existing backend, e.g. a shared [`MemoryBackend`] in tests.
    pub fn from_backend(backend: Arc<dyn KvBackend>, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        debug!(backend = backend.name(), endpoint = %endpoint, "store client created");
        Self { backend, endpoint }
    }

    pub async fn ping(&self) -> StoreResult<()> {
        self.backend.ping().await
    }

    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    /// Redacted endpoint description.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
