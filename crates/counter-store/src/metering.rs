//! Best-effort invocation counters.
//!
//! Each metered method increments `call@<method>`. Metering must never fail
//! a request, so errors are logged and dropped.

use tracing::{error, trace};

use crate::keys;
use crate::kv::KeyValueService;

#[derive(Debug, Clone)]
pub struct CallMeter {
    kv: KeyValueService,
}

impl CallMeter {
    pub fn new(kv: KeyValueService) -> Self {
        Self { kv }
    }

    /// Count one invocation of `method`.
    pub async fn increment_method_counter(&self, method: &str) {
        let key = keys::construct_call_key(method);
        match self.kv.incr(&key).await {
            Ok(count) => trace!(method, count, "method call counted"),
            Err(err) => error!(method, %err, "incr method calls failed"),
        }
    }
}
