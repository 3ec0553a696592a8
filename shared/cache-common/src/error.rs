//! Error types for cache store operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis connection error: {0}")]
    RedisConnection(#[from] redis::RedisError),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Lua script execution error: {0}")]
    LuaScriptExecution(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl CacheError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CacheError::RedisConnection(e) => {
                e.is_io_error() || e.is_timeout() || e.is_connection_dropped()
            }
            CacheError::Pool(_) | CacheError::LuaScriptExecution(_) => true,
            _ => false,
        }
    }
}
