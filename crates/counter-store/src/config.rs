//! Store configuration.
//!
//! [`StoreConfig`] holds the connection URL and the tunables of the
//! key-value layer. Values are layered: built-in defaults, then an optional
//! TOML file, then `COUNTER_*` environment variables. A builder-style API
//! allows callers to override individual fields fluently.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::kv::KvSettings;

/// Connection URL used when nothing else is configured.
pub const DEFAULT_URL: &str = "redis://:@localhost:6379/0";

/// Sliding TTL window: 90 days.
pub const DEFAULT_KEY_TTL_SECS: u64 = 3 * 30 * 24 * 60 * 60;

/// Keys requested per `SCAN` round trip.
pub const DEFAULT_SCAN_PAGE_SIZE: usize = 10;

/// Per-operation deadline.
pub const DEFAULT_OP_TIMEOUT_MS: u64 = 5_000;

/// Configuration for [`crate::StoreClient`] and [`crate::KeyValueService`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// `scheme://[:password@]host:port/db-index`, or `memory://`.
    ///
    /// Default: **`redis://:@localhost:6379/0`**.
    pub url: String,

    /// Sliding TTL applied to data and call-counter keys, in seconds.
    ///
    /// Default: **7 776 000** (90 days).
    pub key_ttl_secs: u64,

    /// Page size hint passed as `COUNT` to each `SCAN` round trip.
    ///
    /// Default: **10**.
    pub scan_page_size: usize,

    /// Deadline for a single backend round trip, in milliseconds.
    ///
    /// Default: **5 000 ms**.
    pub op_timeout_ms: u64,

    /// Server-side key for hashing namespace secrets.
    ///
    /// Default: **none** (a built-in key is used and a warning logged).
    pub secret_key: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            key_ttl_secs: DEFAULT_KEY_TTL_SECS,
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
            op_timeout_ms: DEFAULT_OP_TIMEOUT_MS,
            secret_key: None,
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document. Missing fields keep their defaults.
    pub fn from_toml_str(content: &str) -> StoreResult<Self> {
        toml::from_str(content).map_err(|e| StoreError::Config(format!("invalid TOML: {e}")))
    }

    /// Load a TOML file, overlay the process environment, and validate.
    ///
    /// A missing file is not an error: defaults plus environment apply.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// [`Self::load`] with variables resolved through `lookup` instead of
    /// the process environment.
    pub fn load_with<F>(path: impl AsRef<Path>, lookup: F) -> StoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                StoreError::Config(format!("failed to read {}: {e}", path.display()))
            })?;
            Self::from_toml_str(&content)?
        } else {
            debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };
        config.overlay_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with the process environment, validated.
    pub fn from_env() -> StoreResult<Self> {
        let mut config = Self::default();
        config.overlay_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `COUNTER_*` variables resolved through `lookup`.
    pub fn overlay_env<F>(&mut self, lookup: F) -> StoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("COUNTER_REDIS_URL") {
            self.url = url;
        }
        if let Some(raw) = lookup("COUNTER_KEY_TTL_SECS") {
            self.key_ttl_secs = parse_number("COUNTER_KEY_TTL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("COUNTER_SCAN_PAGE_SIZE") {
            self.scan_page_size = parse_number("COUNTER_SCAN_PAGE_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("COUNTER_OP_TIMEOUT_MS") {
            self.op_timeout_ms = parse_number("COUNTER_OP_TIMEOUT_MS", &raw)?;
        }
        if let Some(key) = lookup("COUNTER_SECRET_KEY") {
            self.secret_key = Some(key).filter(|k| !k.is_empty());
        }
        Ok(())
    }

    /// Reject values the key-value layer cannot work with.
    pub fn validate(&self) -> StoreResult<()> {
        if self.url.trim().is_empty() {
            return Err(StoreError::Config("url must not be empty".into()));
        }
        if self.key_ttl_secs == 0 {
            return Err(StoreError::Config("key_ttl_secs must be positive".into()));
        }
        if self.scan_page_size == 0 {
            return Err(StoreError::Config("scan_page_size must be positive".into()));
        }
        if self.op_timeout_ms == 0 {
            return Err(StoreError::Config("op_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Set the connection URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the sliding TTL window (in seconds).
    pub fn with_key_ttl_secs(mut self, secs: u64) -> Self {
        self.key_ttl_secs = secs;
        self
    }

    /// Set the scan page size.
    pub fn with_scan_page_size(mut self, size: usize) -> Self {
        self.scan_page_size = size;
        self
    }

    /// Set the per-operation deadline (in milliseconds).
    pub fn with_op_timeout_ms(mut self, ms: u64) -> Self {
        self.op_timeout_ms = ms;
        self
    }

    /// Set the secret-hashing key.
    pub fn with_secret_key(mut self, key: impl Into<String>) -> Self {
        self.secret_key = Some(key.into());
        self
    }

    /// The key-value tunables derived from this configuration.
    pub fn kv_settings(&self) -> KvSettings {
        KvSettings {
            key_ttl: Duration::from_secs(self.key_ttl_secs),
            scan_page_size: self.scan_page_size,
            op_timeout: Duration::from_millis(self.op_timeout_ms),
        }
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> StoreResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| StoreError::Config(format!("{name} must be a non-negative integer, got {raw:?}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.url, "redis://:@localhost:6379/0");
        assert_eq!(cfg.key_ttl_secs, 90 * 24 * 60 * 60);
        assert_eq!(cfg.scan_page_size, 10);
        assert_eq!(cfg.op_timeout_ms, 5000);
        assert!(cfg.secret_key.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn toml_overrides_only_given_fields() {
        let cfg = StoreConfig::from_toml_str(
            r#"
            url = "redis://:pw@cache:6380/2"
            scan_page_size = 50
            "#,
        )
        .unwrap();
        assert_eq!(cfg.url, "redis://:pw@cache:6380/2");
        assert_eq!(cfg.scan_page_size, 50);
        assert_eq!(cfg.key_ttl_secs, DEFAULT_KEY_TTL_SECS);
    }

    #[test]
    fn toml_rejects_unknown_fields() {
        let err = StoreConfig::from_toml_str("ttl = 5").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn env_overlay_wins() {
        let vars: HashMap<&str, &str> = [
            ("COUNTER_REDIS_URL", "memory://"),
            ("COUNTER_KEY_TTL_SECS", "60"),
            ("COUNTER_SECRET_KEY", "pepper"),
        ]
        .into_iter()
        .collect();

        let mut cfg = StoreConfig::default();
        cfg.overlay_env(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.url, "memory://");
        assert_eq!(cfg.key_ttl_secs, 60);
        assert_eq!(cfg.secret_key.as_deref(), Some("pepper"));
        assert_eq!(cfg.scan_page_size, DEFAULT_SCAN_PAGE_SIZE);
    }

    #[test]
    fn env_overlay_rejects_garbage_numbers() {
        let mut cfg = StoreConfig::default();
        let err = cfg
            .overlay_env(|name| (name == "COUNTER_SCAN_PAGE_SIZE").then(|| "ten".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("COUNTER_SCAN_PAGE_SIZE"));
    }

    #[test]
    fn validate_rejects_zero_values() {
        assert!(StoreConfig::new().with_key_ttl_secs(0).validate().is_err());
        assert!(StoreConfig::new().with_scan_page_size(0).validate().is_err());
        assert!(StoreConfig::new().with_op_timeout_ms(0).validate().is_err());
        assert!(StoreConfig::new().with_url("  ").validate().is_err());
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "op_timeout_ms = 250").unwrap();
        writeln!(file, "scan_page_size = 7").unwrap();
        let cfg = StoreConfig::load_with(file.path(), |_| None).unwrap();
        assert_eq!(cfg.op_timeout_ms, 250);
        assert_eq!(cfg.scan_page_size, 7);
    }

    #[test]
    fn load_overlays_lookup_on_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "op_timeout_ms = 250").unwrap();
        let cfg = StoreConfig::load_with(file.path(), |name| {
            (name == "COUNTER_OP_TIMEOUT_MS").then(|| "900".to_string())
        })
        .unwrap();
        assert_eq!(cfg.op_timeout_ms, 900);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = StoreConfig::load_with(dir.path().join("absent.toml"), |_| None).unwrap();
        assert_eq!(cfg, StoreConfig::default());
    }

    #[test]
    fn kv_settings_conversion() {
        let settings = StoreConfig::new()
            .with_key_ttl_secs(30)
            .with_scan_page_size(3)
            .with_op_timeout_ms(100)
            .kv_settings();
        assert_eq!(settings.key_ttl, Duration::from_secs(30));
        assert_eq!(settings.scan_page_size, 3);
        assert_eq!(settings.op_timeout, Duration::from_millis(100));
    }
}
