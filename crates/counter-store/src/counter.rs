//! Page-view counter operations.
//!
//! [`CounterService`] is the transport-independent core behind the counter
//! API: a thin HTTP or CLI layer maps each request onto one method here and
//! each [`StoreError`] variant onto a response code. Every user-facing
//! operation is metered under its method name before any validation, so
//! rejected requests are counted too.
//!
//! Reads only need the namespace to exist. Mutations (`increment`, `reset`,
//! `delete`) require the namespace secret.

use tracing::{debug, instrument, warn};

use crate::auth::{NamespaceAuth, SecretHasher};
use crate::client::StoreClient;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::keys::{self, CALL_PREFIX, DATA_PREFIX, NAMESPACE_PREFIX};
use crate::kv::{KeyValue, KeyValueService};
use crate::metering::CallMeter;

/// Method names recorded by [`CallMeter`].
pub mod methods {
    pub const GET: &str = "get_pv";
    pub const CREATE: &str = "create_pv";
    pub const INCREMENT: &str = "increment_pv";
    pub const RESET: &str = "reset_pv";
    pub const DELETE: &str = "delete_pv";
}

#[derive(Debug, Clone)]
pub struct CounterService {
    kv: KeyValueService,
    auth: NamespaceAuth,
    meter: CallMeter,
}

impl CounterService {
    /// Wire the service over `client` using the tunables in `config`.
    pub fn new(client: StoreClient, config: &StoreConfig) -> Self {
        let kv = KeyValueService::new(client, config.kv_settings());
        let hasher = SecretHasher::from_configured(config.secret_key.as_deref());
        Self::from_parts(kv, hasher)
    }

    pub fn from_parts(kv: KeyValueService, hasher: SecretHasher) -> Self {
        Self {
            auth: NamespaceAuth::new(kv.clone(), hasher),
            meter: CallMeter::new(kv.clone()),
            kv,
        }
    }

    pub fn kv(&self) -> &KeyValueService {
        &self.kv
    }

    pub fn auth(&self) -> &NamespaceAuth {
        &self.auth
    }

    async fn require_namespace(&self, namespace: &str) -> StoreResult<()> {
        if !self.auth.namespace_exists(namespace).await? {
            warn!(namespace, "invalid namespace");
            return Err(StoreError::InvalidNamespace {
                namespace: namespace.to_string(),
            });
        }
        Ok(())
    }

    async fn require_secret(&self, namespace: &str, secret: &str) -> StoreResult<()> {
        if secret.is_empty() {
            return Err(StoreError::InvalidArgument("secret must not be empty".into()));
        }
        if !self.auth.authenticate(namespace, secret).await {
            return Err(StoreError::AuthenticationFailed);
        }
        Ok(())
    }

    /// Read one counter, or every counter of the namespace when `key` is
    /// `None`. Reading refreshes the TTL of each returned key.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidNamespace`] if the namespace is not registered.
    /// - [`StoreError::NotFound`] if the key (or, without a key, every key of
    ///   the namespace) is absent.
    #[instrument(skip(self))]
    pub async fn get(&self, namespace: &str, key: Option<&str>) -> StoreResult<Vec<KeyValue>> {
        self.meter.increment_method_counter(methods::GET).await;
        keys::validate_namespace(namespace)?;
        self.require_namespace(namespace).await?;

        match key.filter(|k| !k.is_empty()) {
            Some(subkey) => {
                let data_key = keys::construct_data_key(namespace, subkey);
                let value = self.kv.get(&data_key).await?;
                Ok(vec![KeyValue {
                    key: data_key,
                    value,
                }])
            }
            None => {
                let pattern = keys::namespace_data_pattern(namespace);
                let data_keys = self.kv.get_prefix_match_keys(&pattern).await?;
                if data_keys.is_empty() {
                    return Err(StoreError::NotFound { key: pattern });
                }
                self.kv.batch_get(&data_keys).await
            }
        }
    }

    /// Register `namespace`. An absent or empty secret defaults to the
    /// namespace name. Returns the namespace record key.
    #[instrument(skip(self, secret))]
    pub async fn create(&self, namespace: &str, secret: Option<&str>) -> StoreResult<String> {
        self.meter.increment_method_counter(methods::CREATE).await;
        let secret = secret.filter(|s| !s.is_empty()).unwrap_or(namespace);
        self.auth.register_namespace(namespace, secret).await
    }

    /// Add one to a counter and return the new value.
    #[instrument(skip(self, secret))]
    pub async fn increment(&self, namespace: &str, secret: &str, key: &str) -> StoreResult<KeyValue> {
        self.meter.increment_method_counter(methods::INCREMENT).await;
        keys::validate_namespace(namespace)?;
        keys::validate_subkey(key)?;
        self.require_secret(namespace, secret).await?;

        let data_key = keys::construct_data_key(namespace, key);
        let value = self.kv.incr(&data_key).await?;
        Ok(KeyValue {
            key: data_key,
            value: value.to_string(),
        })
    }

    /// Overwrite a counter with `value`, which must be an integer.
    #[instrument(skip(self, secret))]
    pub async fn reset(&self, namespace: &str, secret: &str, key: &str, value: &str) -> StoreResult<()> {
        self.meter.increment_method_counter(methods::RESET).await;
        keys::validate_namespace(namespace)?;
        keys::validate_subkey(key)?;
        let value: i64 = value
            .trim()
            .parse()
            .map_err(|_| StoreError::InvalidArgument(format!("value must be an integer, got {value:?}")))?;
        self.require_secret(namespace, secret).await?;

        let data_key = keys::construct_data_key(namespace, key);
        self.kv.set(&data_key, &value.to_string(), true).await
    }

    /// Remove a counter, returning how many keys were deleted (0 or 1).
    #[instrument(skip(self, secret))]
    pub async fn delete(&self, namespace: &str, secret: &str, key: &str) -> StoreResult<i64> {
        self.meter.increment_method_counter(methods::DELETE).await;
        keys::validate_namespace(namespace)?;
        keys::validate_subkey(key)?;
        self.require_secret(namespace, secret).await?;

        let data_key = keys::construct_data_key(namespace, key);
        self.kv.delete(&[data_key]).await
    }

    // ── statistics ───────────────────────────────────────────────────

    pub async fn count_namespaces(&self) -> StoreResult<usize> {
        let pattern = keys::family_pattern(NAMESPACE_PREFIX);
        Ok(self.kv.get_prefix_match_keys(&pattern).await?.len())
    }

    pub async fn count_keys(&self) -> StoreResult<usize> {
        let pattern = keys::family_pattern(DATA_PREFIX);
        Ok(self.kv.get_prefix_match_keys(&pattern).await?.len())
    }

    /// Sum of every method counter. Counters that vanished or hold
    /// non-integer values are skipped.
    pub async fn count_requests(&self) -> StoreResult<i64> {
        let pattern = keys::family_pattern(CALL_PREFIX);
        let call_keys = self.kv.get_prefix_match_keys(&pattern).await?;
        let counters = self.kv.batch_get(&call_keys).await?;

        let mut total: i64 = 0;
        for counter in counters {
            match counter.value.parse::<i64>() {
                Ok(count) => total = total.saturating_add(count),
                Err(_) => debug!(key = %counter.key, value = %counter.value, "skipping unreadable call counter"),
            }
        }
        Ok(total)
    }
}
