//! Redis connection manager with pooling

use crate::{CacheError, Result};
use deadpool_redis::{Config, Pool, Runtime};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Pool settings shared by every provider talking to the cache
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisSettings {
    pub redis_url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl RedisSettings {
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            pool_size: default_pool_size(),
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self::new("redis://127.0.0.1:6379")
    }
}

fn default_pool_size() -> usize {
    16
}

/// Redis connection manager with pooling
pub struct RedisManager {
    pool: Pool,
}

impl RedisManager {
    /// Create the pool and verify it with a PING
    pub async fn new(settings: &RedisSettings) -> Result<Self> {
        let mut redis_config = Config::from_url(&settings.redis_url);
        redis_config.pool = Some(deadpool_redis::PoolConfig::new(settings.pool_size));
        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::Configuration(format!("Failed to create pool: {}", e)))?;

        let manager = Self { pool };
        let mut conn = manager.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!(
            "Redis connection pool initialized with {} connections",
            settings.pool_size
        );

        Ok(manager)
    }

    /// Get connection from pool
    pub async fn get_connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool.get().await.map_err(|e| {
            CacheError::RedisConnection(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "Failed to get connection from pool",
                e.to_string(),
            )))
        })
    }

    pub fn pool_status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }
}

/// Pool status information
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
}
