//! In-memory [`CacheStore`] used by unit tests across the workspace

use crate::{CacheError, CacheStore, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// String value with its expiry deadline; `None` never expires
struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StringEntry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

#[derive(Default)]
struct MemoryState {
    zsets: HashMap<String, BTreeMap<String, i64>>,
    strings: HashMap<String, StringEntry>,
    zadd_batches: usize,
    unavailable: bool,
}

impl MemoryState {
    fn check(&self) -> Result<()> {
        if self.unavailable {
            return Err(CacheError::Pool("memory store marked unavailable".to_string()));
        }
        Ok(())
    }

    /// Drop string keys whose deadline has passed, as Redis does on access
    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.strings.retain(|_key, entry| entry.live(now));
    }

    fn put_string(&mut self, key: &str, value: &str, ttl_secs: Option<u64>) {
        self.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: ttl_secs.map(|secs| Instant::now() + Duration::from_secs(secs)),
            },
        );
    }
}

#[derive(Clone, Default)]
pub struct MemoryCacheStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a retryable error
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    pub async fn zset(&self, key: &str) -> BTreeMap<String, i64> {
        self.state
            .lock()
            .await
            .zsets
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn seed_zset(&self, key: &str, entries: &[(&str, i64)]) {
        let mut guard = self.state.lock().await;
        let zset = guard.zsets.entry(key.to_string()).or_default();
        for (member, score) in entries {
            zset.insert(member.to_string(), *score);
        }
    }

    pub async fn string(&self, key: &str) -> Option<String> {
        let mut guard = self.state.lock().await;
        guard.purge_expired();
        guard.strings.get(key).map(|entry| entry.value.clone())
    }

    /// Remaining lifetime of a string key; `None` when missing or persistent
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let mut guard = self.state.lock().await;
        guard.purge_expired();
        let deadline = guard.strings.get(key)?.expires_at?;
        Some(deadline.saturating_duration_since(Instant::now()))
    }

    pub async fn seed_string(&self, key: &str, value: &str) {
        self.state.lock().await.put_string(key, value, None);
    }

    /// Drop a string key as if its TTL elapsed
    pub async fn expire(&self, key: &str) {
        self.state.lock().await.strings.remove(key);
    }

    /// Number of `zadd_batch` transactions executed
    pub async fn zadd_batches(&self) -> usize {
        self.state.lock().await.zadd_batches
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let mut guard = self.state.lock().await;
        guard.check()?;
        guard.purge_expired();
        Ok(guard.strings.contains_key(key) || guard.zsets.contains_key(key))
    }

    async fn zadd_batch(&self, key: &str, entries: &[(String, i64)]) -> Result<()> {
        let mut guard = self.state.lock().await;
        guard.check()?;
        if entries.is_empty() {
            return Ok(());
        }
        let zset = guard.zsets.entry(key.to_string()).or_default();
        for (member, score) in entries {
            zset.insert(member.clone(), *score);
        }
        guard.zadd_batches += 1;
        Ok(())
    }

    async fn zrange_by_score(&self, key: &str, min: i64) -> Result<Vec<(String, i64)>> {
        let guard = self.state.lock().await;
        guard.check()?;
        let mut items: Vec<(String, i64)> = guard
            .zsets
            .get(key)
            .into_iter()
            .flat_map(|zset| zset.iter())
            .filter(|(_member, score)| **score >= min)
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        items.sort_by_key(|(member, score)| (*score, member.clone()));
        Ok(items)
    }

    async fn zrem_range_by_score(&self, key: &str, below: i64) -> Result<u64> {
        let mut guard = self.state.lock().await;
        guard.check()?;
        let Some(zset) = guard.zsets.get_mut(key) else {
            return Ok(0);
        };
        let before = zset.len();
        zset.retain(|_member, score| *score >= below);
        let removed = (before - zset.len()) as u64;
        if zset.is_empty() {
            guard.zsets.remove(key);
        }
        Ok(removed)
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut guard = self.state.lock().await;
        guard.check()?;
        guard.purge_expired();
        if guard.strings.contains_key(key) {
            return Ok(false);
        }
        guard.put_string(key, value, Some(ttl_secs));
        Ok(true)
    }

    async fn release_if_owner(&self, key: &str, owner: &str) -> Result<bool> {
        let mut guard = self.state.lock().await;
        guard.check()?;
        guard.purge_expired();
        if guard.strings.get(key).map(|entry| entry.value.as_str()) == Some(owner) {
            guard.strings.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut guard = self.state.lock().await;
        guard.check()?;
        guard.purge_expired();
        Ok(guard.strings.get(key).map(|entry| entry.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut guard = self.state.lock().await;
        guard.check()?;
        guard.put_string(key, value, Some(ttl_secs));
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.state.lock().await.check()
    }
}
