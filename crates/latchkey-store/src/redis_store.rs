//! Redis store adapter
//!
//! Maps the lease primitives onto the classic Redis commands:
//! `SETNX` for set-if-absent, `GETSET` for get-and-replace, plus `GET` and
//! `DEL`. The check-and-act operations run as Lua scripts so the read and the
//! mutation happen in one server-side step.

use async_trait::async_trait;
use latchkey_common::{StoreError, StoreResult};
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use tracing::{debug, info};

use crate::adapter::{ConditionalDelete, StoreAdapter};

/// Reply codes: 1 deleted, 2 expired, 0 absent, -1 corrupt (with the raw value)
const DELETE_IF_LIVE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return {0, false}
end
if not string.match(current, '^[-+]?%d+$') then
    return {-1, current}
end
local expires_at = tonumber(current)
if expires_at >= tonumber(ARGV[1]) then
    redis.call('DEL', KEYS[1])
    return {1, false}
end
return {2, false}
"#;

const DELETE_IF_EQUALS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const REPLACE_IF_EQUALS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

fn store_error(operation: &'static str) -> impl Fn(RedisError) -> StoreError {
    move |e| {
        if e.is_timeout() {
            StoreError::Timeout { operation }
        } else {
            StoreError::unavailable(operation, e.to_string())
        }
    }
}

/// Redis-backed store adapter
///
/// Holds a [`ConnectionManager`], which reconnects transparently; cloning it
/// per call is cheap and shares the underlying multiplexed connection.
pub struct RedisStore {
    manager: ConnectionManager,
    delete_if_live: Script,
    delete_if_equals: Script,
    replace_if_equals: Script,
}

impl RedisStore {
    /// Connect to the Redis server at `url` (e.g. `redis://127.0.0.1:6379/0`)
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(store_error("connect"))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(store_error("connect"))?;

        let addr = client.get_connection_info().addr.to_string();
        info!(addr = %addr, "Connected to Redis lease store");

        Ok(Self {
            manager,
            delete_if_live: Script::new(DELETE_IF_LIVE_SCRIPT),
            delete_if_equals: Script::new(DELETE_IF_EQUALS_SCRIPT),
            replace_if_equals: Script::new(REPLACE_IF_EQUALS_SCRIPT),
        })
    }
}

#[async_trait]
impl StoreAdapter for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut con = self.manager.clone();
        let created: bool = redis::cmd("SETNX")
            .arg(key)
            .arg(value)
            .query_async(&mut con)
            .await
            .map_err(store_error("set_if_absent"))?;
        Ok(created)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut con = self.manager.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(store_error("get"))?;
        Ok(value)
    }

    async fn get_and_replace(&self, key: &str, value: &str) -> StoreResult<Option<String>> {
        let mut con = self.manager.clone();
        let previous: Option<String> = redis::cmd("GETSET")
            .arg(key)
            .arg(value)
            .query_async(&mut con)
            .await
            .map_err(store_error("get_and_replace"))?;
        Ok(previous)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut con = self.manager.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(store_error("delete"))?;
        debug!(key = %key, removed, "DEL");
        Ok(())
    }

    fn supports_check_and_act(&self) -> bool {
        true
    }

    async fn delete_if_live(&self, key: &str, now_ms: i64) -> StoreResult<ConditionalDelete> {
        let mut con = self.manager.clone();
        let (code, raw): (i64, Option<String>) = self
            .delete_if_live
            .key(key)
            .arg(now_ms)
            .invoke_async(&mut con)
            .await
            .map_err(store_error("delete_if_live"))?;

        Ok(match code {
            1 => ConditionalDelete::Deleted,
            2 => ConditionalDelete::Expired,
            0 => ConditionalDelete::Absent,
            _ => ConditionalDelete::Corrupt(raw.unwrap_or_default()),
        })
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut con = self.manager.clone();
        let deleted: bool = self
            .delete_if_equals
            .key(key)
            .arg(expected)
            .invoke_async(&mut con)
            .await
            .map_err(store_error("delete_if_equals"))?;
        Ok(deleted)
    }

    async fn replace_if_equals(&self, key: &str, expected: &str, value: &str) -> StoreResult<bool> {
        let mut con = self.manager.clone();
        let replaced: bool = self
            .replace_if_equals
            .key(key)
            .arg(expected)
            .arg(value)
            .invoke_async(&mut con)
            .await
            .map_err(store_error("replace_if_equals"))?;
        Ok(replaced)
    }
}
