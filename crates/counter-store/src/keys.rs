//! Key naming convention.
//!
//! ```text
//! namespace@<name>         ownership record, permanent
//! key@<namespace>@<subkey> counter value, sliding TTL
//! call@<method>            invocation counter, sliding TTL
//! ```
//!
//! `@` is reserved: namespace names must not contain it, which keeps every
//! data key unambiguous even when the subkey does.

use crate::error::{StoreError, StoreResult};
use crate::glob;

pub const DELIMITER: char = '@';

pub const NAMESPACE_PREFIX: &str = "namespace";
pub const DATA_PREFIX: &str = "key";
pub const CALL_PREFIX: &str = "call";

/// Check that `name` can be used as a namespace.
pub fn validate_namespace(name: &str) -> StoreResult<()> {
    if name.is_empty() || name.contains(DELIMITER) {
        return Err(StoreError::InvalidArgument(format!(
            "namespace must be non-empty and must not contain {DELIMITER:?}"
        )));
    }
    Ok(())
}

pub fn validate_subkey(key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidArgument("key must not be empty".into()));
    }
    Ok(())
}

/// `namespace@<name>`. `name` must pass [`validate_namespace`].
pub fn construct_namespace_key(name: &str) -> String {
    format!("{NAMESPACE_PREFIX}{DELIMITER}{name}")
}

/// `key@<namespace>@<subkey>`. `namespace` must pass [`validate_namespace`].
pub fn construct_data_key(namespace: &str, subkey: &str) -> String {
    format!("{DATA_PREFIX}{DELIMITER}{namespace}{DELIMITER}{subkey}")
}

pub fn construct_call_key(method: &str) -> String {
    format!("{CALL_PREFIX}{DELIMITER}{method}")
}

/// Scan pattern for every data key of one namespace.
///
/// Glob metacharacters in the name are escaped so `a*` cannot match the
/// keys of namespace `ab`.
pub fn namespace_data_pattern(namespace: &str) -> String {
    format!("{DATA_PREFIX}{DELIMITER}{}{DELIMITER}*", glob::escape(namespace))
}

/// Scan pattern matching every key of one family.
pub fn family_pattern(prefix: &str) -> String {
    format!("{prefix}{DELIMITER}*")
}
