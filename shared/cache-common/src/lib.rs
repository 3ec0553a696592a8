//! Cache Common - Redis primitives for the token ranking jobs
//!
//! - **Store**: [`CacheStore`] command surface backed by a `deadpool-redis` pool
//! - **Distributed lock**: single-key `SET NX EX` lock with owner-checked release
//! - **TTL sorted set**: the hot set of tokens, scored by expiry
//! - **Scheduler**: cron ticker driving the lock-guarded jobs
//!
//! # Key Layout
//!
//! ```text
//! hot:tokens                   # sorted set, member = token address, score = expiry epoch seconds
//! token:flags:<address>        # JSON holder/flag fallback for ranking
//! ranking:result:<cache key>   # JSON ranked result
//! job:refresh:<domain>         # refresh job lock
//! job:reindex:<alias>          # reindex job lock
//! ```

pub mod error;
pub mod hot_set;
pub mod lock;
pub mod redis_ops;
pub mod scheduler;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use error::CacheError;
pub use hot_set::{now_epoch, TtlSortedSet};
pub use lock::{reindex_lock_key, refresh_lock_key, DistributedLock, LockLease, LockedRun};
pub use redis_ops::{PoolStatus, RedisManager, RedisSettings};
pub use scheduler::JobScheduler;
pub use store::{CacheStore, RedisCacheStore};

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryCacheStore;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Key of the JSON flag fallback for one token
pub fn token_flags_key(address: &str) -> String {
    format!("token:flags:{}", address)
}

/// Key of a cached ranking result
pub fn ranking_result_key(cache_key: &str) -> String {
    format!("ranking:result:{}", cache_key)
}
