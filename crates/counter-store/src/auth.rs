//! Namespace registration and authentication.
//!
//! A namespace is a permanent `namespace@<name>` record whose value is a
//! keyed hash of the namespace secret. The raw secret is never stored.
//! Hashing is HMAC-SHA256 (`ring::hmac`) over `name@secret` under a
//! server-side key, base64-encoded; verification is constant-time.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ring::hmac;
use tracing::{debug, info, instrument, warn};

use crate::error::{StoreError, StoreResult};
use crate::keys::{self, DELIMITER};
use crate::kv::KeyValueService;

/// Hashing key used when none is configured.
const BUILTIN_SECRET_KEY: &[u8] = b"counter-store/namespace-secret/v1";

// ---------------------------------------------------------------------------
// Secret hashing
// ---------------------------------------------------------------------------

/// Keyed hash of namespace secrets.
#[derive(Clone)]
pub struct SecretHasher {
    key: hmac::Key,
}

impl std::fmt::Debug for SecretHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretHasher").finish_non_exhaustive()
    }
}

impl SecretHasher {
    pub fn new(key: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, key),
        }
    }

    /// Hasher over the configured key, falling back to the built-in key.
    pub fn from_configured(key: Option<&str>) -> Self {
        match key {
            Some(key) if !key.is_empty() => Self::new(key.as_bytes()),
            _ => {
                warn!("no secret_key configured; hashing namespace secrets with the built-in key");
                Self::new(BUILTIN_SECRET_KEY)
            }
        }
    }

    fn message(name: &str, secret: &str) -> String {
        format!("{name}{DELIMITER}{secret}")
    }

    /// The storable hash of `secret` for namespace `name`.
    pub fn hash(&self, name: &str, secret: &str) -> String {
        let tag = hmac::sign(&self.key, Self::message(name, secret).as_bytes());
        BASE64.encode(tag.as_ref())
    }

    /// Whether `secret` matches `stored`. Malformed hashes never match.
    pub fn verify(&self, name: &str, secret: &str, stored: &str) -> bool {
        let Ok(tag) = BASE64.decode(stored) else {
            return false;
        };
        hmac::verify(&self.key, Self::message(name, secret).as_bytes(), &tag).is_ok()
    }
}

// ---------------------------------------------------------------------------
// NamespaceAuth
// ---------------------------------------------------------------------------

/// Registers namespaces and checks secrets against them.
#[derive(Debug, Clone)]
pub struct NamespaceAuth {
    kv: KeyValueService,
    hasher: SecretHasher,
}

impl NamespaceAuth {
    pub fn new(kv: KeyValueService, hasher: SecretHasher) -> Self {
        Self { kv, hasher }
    }

    /// Create namespace `name` owned by `raw_secret`.
    ///
    /// The record is written with an atomic set-if-absent, so of several
    /// concurrent registrations exactly one succeeds.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidArgument`] if `name` is empty or contains `@`.
    /// - [`StoreError::AlreadyExists`] if the namespace is registered.
    #[instrument(skip(self, raw_secret))]
    pub async fn register_namespace(&self, name: &str, raw_secret: &str) -> StoreResult<String> {
        keys::validate_namespace(name)?;
        let key = keys::construct_namespace_key(name);
        let hash = self.hasher.hash(name, raw_secret);

        if !self.kv.set_if_absent(&key, &hash, false).await? {
            warn!(namespace = name, "namespace already exists");
            return Err(StoreError::AlreadyExists {
                namespace: name.to_string(),
            });
        }
        info!(namespace = name, "namespace registered");
        Ok(key)
    }

    /// Whether `supplied_secret` owns namespace `name`.
    ///
    /// Fails closed: an invalid name, an absent namespace, a mismatching
    /// secret, and a store error all return `false`, indistinguishably.
    #[instrument(skip(self, supplied_secret))]
    pub async fn authenticate(&self, name: &str, supplied_secret: &str) -> bool {
        if keys::validate_namespace(name).is_err() {
            return false;
        }
        let key = keys::construct_namespace_key(name);
        match self.kv.peek(&key).await {
            Ok(Some(stored)) => {
                let ok = self.hasher.verify(name, supplied_secret, &stored);
                if !ok {
                    warn!(namespace = name, "secret is invalid");
                }
                ok
            }
            Ok(None) => {
                debug!(namespace = name, "authentication against absent namespace");
                false
            }
            Err(err) => {
                warn!(namespace = name, %err, "namespace lookup failed during authentication");
                false
            }
        }
    }

    /// Whether namespace `name` is registered. Does not touch its TTL.
    pub async fn namespace_exists(&self, name: &str) -> StoreResult<bool> {
        keys::validate_namespace(name)?;
        let key = keys::construct_namespace_key(name);
        Ok(self.kv.peek(&key).await?.is_some())
    }
}
