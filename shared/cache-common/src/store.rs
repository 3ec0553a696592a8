//! Primitive cache operations
//!
//! [`CacheStore`] is the small command surface the ranking jobs rely on.
//! Sorted-set writes go through `MULTI/EXEC` and range deletes, so concurrent
//! readers never observe a half-written hot set.

use crate::{RedisManager, Result};
use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use std::sync::Arc;
use tracing::debug;

/// Deletes the key only while it still holds the caller's owner token
const RELEASE_IF_OWNER: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Add or update every `(member, score)` pair in one transaction
    async fn zadd_batch(&self, key: &str, entries: &[(String, i64)]) -> Result<()>;

    /// Members with `score >= min`, ascending by score
    async fn zrange_by_score(&self, key: &str, min: i64) -> Result<Vec<(String, i64)>>;

    /// Remove members with `score < below`; returns the number removed
    async fn zrem_range_by_score(&self, key: &str, below: i64) -> Result<u64>;

    /// `SET key value NX EX ttl`; true when the key was set
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;

    /// Atomically delete `key` if its value equals `owner`
    async fn release_if_owner(&self, key: &str, owner: &str) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}

pub struct RedisCacheStore {
    redis: Arc<RedisManager>,
    release_script: Script,
}

impl RedisCacheStore {
    pub fn new(redis: Arc<RedisManager>) -> Self {
        Self {
            redis,
            release_script: Script::new(RELEASE_IF_OWNER),
        }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.redis.get_connection().await?;
        let exists: i64 = conn.exists(key).await?;
        Ok(exists > 0)
    }

    async fn zadd_batch(&self, key: &str, entries: &[(String, i64)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut conn = self.redis.get_connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (member, score) in entries {
            pipe.cmd("ZADD").arg(key).arg(*score).arg(member).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;

        debug!("Committed {} members to {}", entries.len(), key);
        Ok(())
    }

    async fn zrange_by_score(&self, key: &str, min: i64) -> Result<Vec<(String, i64)>> {
        let mut conn = self.redis.get_connection().await?;
        let mut cmd = redis::cmd("ZRANGEBYSCORE");
        cmd.arg(key).arg(min).arg("+inf").arg("WITHSCORES");
        let raw: Vec<(String, f64)> = cmd.query_async(&mut conn).await?;
        Ok(raw
            .into_iter()
            .map(|(member, score)| (member, score as i64))
            .collect())
    }

    async fn zrem_range_by_score(&self, key: &str, below: i64) -> Result<u64> {
        let mut conn = self.redis.get_connection().await?;
        let mut cmd = redis::cmd("ZREMRANGEBYSCORE");
        // "(" makes the upper bound exclusive
        cmd.arg(key).arg("-inf").arg(format!("({}", below));
        let removed: u64 = cmd.query_async(&mut conn).await?;
        Ok(removed)
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.redis.get_connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX").arg("EX").arg(ttl_secs);
        let result: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(result.is_some())
    }

    async fn release_if_owner(&self, key: &str, owner: &str) -> Result<bool> {
        let mut conn = self.redis.get_connection().await?;
        let deleted: i64 = self
            .release_script
            .key(key)
            .arg(owner)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.redis.get_connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.redis.get_connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("EX").arg(ttl_secs);
        cmd.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.redis.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
