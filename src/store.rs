// src/store.rs
//! Keyed store used as the single source of truth.
//!
//! Every room-scoped entity (record, tally, vote markers, comments) carries the
//! room's TTL, so expiry is the only deletion path. The two global indexes and
//! the tag sets carry no TTL and may reference rooms that are already gone.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use thiserror::Error;

/// Remaining-TTL sentinel for a key that does not exist (or has expired).
pub const TTL_MISSING: i64 = -2;
/// Remaining-TTL sentinel for a key that exists without an expiry.
pub const TTL_PERSISTENT: i64 = -1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("corrupt record at {key}: {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Key shapes shared with existing deployments.
pub mod keys {
    pub const ROOMS_LATEST: &str = "rooms:list";
    pub const ROOMS_POPULAR: &str = "rooms:popular";

    pub fn room(room_id: &str) -> String {
        format!("room:{room_id}")
    }

    pub fn tally(room_id: &str) -> String {
        format!("votes:{room_id}")
    }

    pub fn voted(room_id: &str, identity: &str) -> String {
        format!("voted:{room_id}:{identity}")
    }

    pub fn tag(tag: &str) -> String {
        format!("rooms:tags:{tag}")
    }

    pub fn comments(room_id: &str) -> String {
        format!("comments:{room_id}")
    }
}

#[async_trait]
pub trait KeyedStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()>;

    /// Seconds left before `key` expires, or one of [`TTL_MISSING`] / [`TTL_PERSISTENT`].
    async fn ttl(&self, key: &str) -> StoreResult<i64>;

    async fn expire(&self, key: &str, ttl_secs: u64) -> StoreResult<()>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    async fn hset_all(&self, key: &str, fields: &[(String, i64)]) -> StoreResult<()>;

    /// Increments `field` only while the hash itself still exists.
    ///
    /// Returns `None` when the hash is gone, so an expired tally is never recreated.
    async fn hincr_existing(&self, key: &str, field: &str, by: i64) -> StoreResult<Option<i64>>;

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, i64>>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()>;

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<()>;

    /// All members, highest score first.
    async fn zrevrange_all(&self, key: &str) -> StoreResult<Vec<String>>;

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()>;

    async fn smembers(&self, key: &str) -> StoreResult<HashSet<String>>;

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()>;

    async fn lrange_all(&self, key: &str) -> StoreResult<Vec<String>>;
}

const HINCR_EXISTING: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return redis.call('HINCRBY', KEYS[1], ARGV[1], ARGV[2])
end
return false
";

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    hincr_existing: Script,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            hincr_existing: Script::new(HINCR_EXISTING),
        }
    }

    fn conn(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

#[async_trait]
impl KeyedStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.conn().get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        let _: () = self.conn().set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> StoreResult<i64> {
        Ok(self.conn().ttl(key).await?)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> StoreResult<()> {
        let _: bool = self.conn().expire(key, ttl_secs as i64).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.conn().exists(key).await?)
    }

    async fn hset_all(&self, key: &str, fields: &[(String, i64)]) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let _: () = self.conn().hset_multiple(key, fields).await?;
        Ok(())
    }

    async fn hincr_existing(&self, key: &str, field: &str, by: i64) -> StoreResult<Option<i64>> {
        let mut conn = self.conn();
        let value: Option<i64> = self
            .hincr_existing
            .key(key)
            .arg(field)
            .arg(by)
            .invoke_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, i64>> {
        Ok(self.conn().hgetall(key).await?)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let _: i64 = self.conn().zadd(key, member, score).await?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<()> {
        let _: i64 = self.conn().zrem(key, member).await?;
        Ok(())
    }

    async fn zrevrange_all(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self.conn().zrevrange(key, 0, -1).await?)
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        let _: i64 = self.conn().sadd(key, member).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> StoreResult<HashSet<String>> {
        Ok(self.conn().smembers(key).await?)
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()> {
        let _: i64 = self.conn().rpush(key, value).await?;
        Ok(())
    }

    async fn lrange_all(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self.conn().lrange(key, 0, -1).await?)
    }
}
