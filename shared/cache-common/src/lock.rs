//! Distributed lock on a single cache key
//!
//! Acquisition is `SET key owner NX EX ttl`; release is an atomic
//! check-then-delete so a holder whose lease already expired cannot delete a
//! lock taken over by another process. There is no renewal: a crashed holder
//! is released by TTL expiry.

use crate::{CacheStore, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lock key of the hot-set refresh job for one cache domain
pub fn refresh_lock_key(domain: &str) -> String {
    format!("job:refresh:{}", domain)
}

/// Lock key of the reindex job for one alias
pub fn reindex_lock_key(alias: &str) -> String {
    format!("job:reindex:{}", alias)
}

/// A granted lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub key: String,
    pub owner: String,
    pub ttl: Duration,
}

/// Outcome of [`DistributedLock::run_exclusive`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockedRun<T> {
    /// Another process holds the lock
    Skipped,
    Completed(T),
}

impl<T> LockedRun<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, LockedRun::Skipped)
    }
}

/// Lock handle; the owner token is fixed for the handle's lifetime
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn CacheStore>,
    owner: String,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            owner: Uuid::new_v4().to_string(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Try once to take the lock; `None` when someone else holds it
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>> {
        let ttl_secs = ttl.as_secs().max(1);
        if !self.store.set_nx_ex(key, &self.owner, ttl_secs).await? {
            debug!("Lock {} held by another owner", key);
            return Ok(None);
        }

        debug!("Acquired lock {} for {}s", key, ttl_secs);
        Ok(Some(LockLease {
            key: key.to_string(),
            owner: self.owner.clone(),
            ttl,
        }))
    }

    /// Release a lease; false when the lease had already expired or been taken over
    pub async fn release(&self, lease: &LockLease) -> Result<bool> {
        let released = self.store.release_if_owner(&lease.key, &lease.owner).await?;
        if !released {
            warn!(
                "Lock {} was no longer owned by {} at release",
                lease.key, lease.owner
            );
        }
        Ok(released)
    }

    /// Run `job` while holding `key`. Not getting the lock is not an error.
    pub async fn run_exclusive<F, T>(&self, key: &str, ttl: Duration, job: F) -> Result<LockedRun<T>>
    where
        F: Future<Output = T> + Send,
        T: Send,
    {
        let Some(lease) = self.acquire(key, ttl).await? else {
            info!("Skipping run, lock {} is held elsewhere", key);
            return Ok(LockedRun::Skipped);
        };

        let output = job.await;

        if let Err(e) = self.release(&lease).await {
            warn!("Failed to release lock {}: {}", key, e);
        }
        Ok(LockedRun::Completed(output))
    }
}
