//! Redis backend built on the `redis` crate's [`ConnectionManager`].
//!
//! The manager multiplexes every caller onto one connection and reconnects
//! transparently, so [`RedisBackend`] is cheap to clone and needs no extra
//! locking. Each call clones the manager handle, which is the documented way
//! to issue concurrent requests.

use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::{FromRedisValue, RedisError, Value};
use async_trait::async_trait;
use tracing::{debug, info};

use super::{Command, KvBackend, Pipeline, Reply, ScanPage, overflow_error};
use crate::error::{StoreError, StoreResult};

/// Shared handle to a Redis server.
#[derive(Clone)]
pub struct RedisBackend {
    manager: ConnectionManager,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend").finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Open a managed connection to `url`, establishing it eagerly.
    ///
    /// `url` must already be validated; errors are reported as-is and the
    /// caller is responsible for redacting credentials.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        let client = ::redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        info!("redis connection manager established");
        Ok(Self { manager })
    }

    fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

/// Millisecond TTL argument; Redis rejects zero.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn is_not_integer(err: &RedisError) -> bool {
    err.to_string().contains("not an integer")
}

fn is_overflow(err: &RedisError) -> bool {
    err.to_string().contains("would overflow")
}

fn convert<T: FromRedisValue>(value: &Value) -> StoreResult<T> {
    ::redis::from_redis_value(value).map_err(StoreError::from)
}

/// Map a pipeline failure, attributing integer-parse and overflow errors to
/// the pipeline's increment.
fn pipeline_error(pipeline: &Pipeline, err: RedisError) -> StoreError {
    let incr_key = pipeline.commands().iter().find_map(|cmd| match cmd {
        Command::IncrBy { key, .. } => Some(key.as_str()),
        _ => None,
    });
    match incr_key {
        Some(key) if is_not_integer(&err) => StoreError::TypeMismatch {
            key: key.to_string(),
        },
        Some(key) if is_overflow(&err) => overflow_error(key),
        _ => StoreError::from(err),
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut con = self.connection();
        let _: String = ::redis::cmd("PING").query_async(&mut con).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut con = self.connection();
        let value: Option<String> = ::redis::cmd("GET").arg(key).query_async(&mut con).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut con = self.connection();
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd.query_async(&mut con).await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let mut con = self.connection();
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        // Nil when the key already existed, OK otherwise.
        let reply: Value = cmd.query_async(&mut con).await?;
        Ok(!matches!(reply, Value::Nil))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut con = self.connection();
        let updated: i64 = ::redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut con)
            .await?;
        Ok(updated == 1)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut con = self.connection();
        // -2: no such key, -1: no expiry.
        let millis: i64 = ::redis::cmd("PTTL").arg(key).query_async(&mut con).await?;
        Ok(u64::try_from(millis).ok().map(Duration::from_millis))
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<i64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut con = self.connection();
        let removed: i64 = ::redis::cmd("DEL").arg(keys).query_async(&mut con).await?;
        Ok(removed)
    }

    async fn execute(&self, pipeline: &Pipeline) -> StoreResult<Vec<Reply>> {
        if pipeline.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = ::redis::pipe();
        for command in pipeline.commands() {
            match command {
                Command::Get { key } => {
                    pipe.cmd("GET").arg(key);
                }
                Command::IncrBy { key, by } => {
                    pipe.cmd("INCRBY").arg(key).arg(*by);
                }
                Command::Expire { key, ttl } => {
                    pipe.cmd("PEXPIRE").arg(key).arg(ttl_millis(*ttl));
                }
            }
        }

        let mut con = self.connection();
        let values: Vec<Value> = pipe
            .query_async(&mut con)
            .await
            .map_err(|e| pipeline_error(pipeline, e))?;

        if values.len() != pipeline.len() {
            return Err(StoreError::Pipeline {
                reason: format!(
                    "expected {} replies, got {}",
                    pipeline.len(),
                    values.len()
                ),
            });
        }

        let mut replies = Vec::with_capacity(values.len());
        for (command, value) in pipeline.commands().iter().zip(values.iter()) {
            let reply = match command {
                Command::Get { .. } => Reply::Value(convert(value)?),
                Command::IncrBy { .. } => Reply::Integer(
                    ::redis::from_redis_value(value).map_err(|e| pipeline_error(pipeline, e))?,
                ),
                Command::Expire { .. } => Reply::Flag(convert::<i64>(value)? == 1),
            };
            replies.push(reply);
        }
        debug!(commands = pipeline.len(), "redis pipeline executed");
        Ok(replies)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage> {
        let mut con = self.connection();
        let (cursor, keys): (u64, Vec<String>) = ::redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut con)
            .await?;
        Ok(ScanPage { cursor, keys })
    }
}
