//! TTL-scored sorted set
//!
//! Members are scored with their expiry (epoch seconds). A member is valid
//! while `score >= now`; expired members are removed lazily by a range delete
//! at the start of each refresh cycle.

use crate::{CacheStore, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub fn now_epoch() -> i64 {
    Utc::now().timestamp()
}

#[derive(Clone)]
pub struct TtlSortedSet {
    store: Arc<dyn CacheStore>,
    key: String,
    ttl: Duration,
}

impl TtlSortedSet {
    pub fn new(store: Arc<dyn CacheStore>, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            ttl,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Remove every member whose expiry is strictly before `now`
    pub async fn evict_expired(&self, now: i64) -> Result<u64> {
        let removed = self.store.zrem_range_by_score(&self.key, now).await?;
        if removed > 0 {
            debug!("Evicted {} expired members from {}", removed, self.key);
        }
        Ok(removed)
    }

    /// Members still valid at `now`
    pub async fn valid_members(&self, now: i64) -> Result<HashSet<String>> {
        let entries = self.store.zrange_by_score(&self.key, now).await?;
        Ok(entries.into_iter().map(|(member, _)| member).collect())
    }

    /// Write all members with expiry `now + ttl` in one transaction
    pub async fn commit(&self, members: &[String], now: i64) -> Result<i64> {
        let expires_at = now + self.ttl.as_secs() as i64;
        let entries: Vec<(String, i64)> = members
            .iter()
            .map(|member| (member.clone(), expires_at))
            .collect();
        self.store.zadd_batch(&self.key, &entries).await?;
        Ok(expires_at)
    }
}
