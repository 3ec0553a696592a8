//! Hot-token cache refresh
//!
//! One cycle, guarded by `job:refresh:<domain>`:
//!
//! ```text
//! LockAcquired -> Cleaning -> Diffing -> Enriching -> Committing -> Idle
//! ```
//!
//! Cleaning drops expired members, Diffing keeps only fresh tokens that are
//! not already valid, Enriching runs the metadata lookup and the safety check
//! concurrently per batch, and Committing writes every enriched token in one
//! transaction. A failed batch is skipped; the committed set never contains
//! half-written entries.

use crate::config::RankingConfig;
use crate::enrichment::{SafetyChecker, TokenRepository};
use crate::model::EnrichedToken;
use crate::pipeline::RankingPipeline;
use crate::query::RankQuery;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Result;
use async_trait::async_trait;
use cache_common::{
    now_epoch, refresh_lock_key, token_flags_key, CacheStore, DistributedLock, LockedRun,
    TtlSortedSet,
};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Source of the fresh top-N token list
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn candidates(&self) -> Result<Vec<String>>;
}

/// Candidates taken from a ranking
pub struct RankedCandidates {
    pipeline: Arc<RankingPipeline>,
    query: RankQuery,
}

impl RankedCandidates {
    pub fn new(pipeline: Arc<RankingPipeline>, query: RankQuery) -> Self {
        Self { pipeline, query }
    }
}

#[async_trait]
impl CandidateSource for RankedCandidates {
    async fn candidates(&self) -> Result<Vec<String>> {
        self.pipeline.candidates(&self.query).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    LockAcquired,
    Cleaning,
    Diffing,
    Enriching,
    Committing,
}

/// What one refresh cycle did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshReport {
    /// Phases entered, in order
    pub phases: Vec<RefreshPhase>,
    pub evicted: u64,
    pub fresh: usize,
    pub already_valid: usize,
    pub cold_start: bool,
    pub candidates: usize,
    pub batches: usize,
    pub skipped_batches: usize,
    /// Tokens neither source knew about; retried next cycle
    pub unenriched: usize,
    pub committed: usize,
    pub expires_at: Option<i64>,
}

impl RefreshReport {
    fn enter(&mut self, phase: RefreshPhase) {
        debug!("Refresh phase {:?}", phase);
        self.phases.push(phase);
    }
}

pub struct HotTokenRefresher {
    candidates: Arc<dyn CandidateSource>,
    repository: Arc<dyn TokenRepository>,
    safety: Arc<dyn SafetyChecker>,
    cache: Arc<dyn CacheStore>,
    hot_set: TtlSortedSet,
    lock: DistributedLock,
    lock_key: String,
    lock_ttl: Duration,
    batch_size: usize,
    retry: RetryConfig,
}

impl HotTokenRefresher {
    pub fn new(
        candidates: Arc<dyn CandidateSource>,
        repository: Arc<dyn TokenRepository>,
        safety: Arc<dyn SafetyChecker>,
        cache: Arc<dyn CacheStore>,
        config: &RankingConfig,
    ) -> Self {
        Self {
            candidates,
            repository,
            safety,
            hot_set: TtlSortedSet::new(cache.clone(), config.hot_set_key.clone(), config.hot_set_ttl()),
            lock: DistributedLock::new(cache.clone()),
            cache,
            lock_key: refresh_lock_key(&config.cache_domain),
            lock_ttl: config.lock_ttl(),
            batch_size: config.enrichment_batch_size.max(1),
            retry: config.retry(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn hot_set(&self) -> &TtlSortedSet {
        &self.hot_set
    }

    /// Run one cycle now. `Skipped` when another process holds the lock.
    pub async fn run_cycle(&self) -> Result<LockedRun<RefreshReport>> {
        self.run_cycle_at(now_epoch()).await
    }

    pub async fn run_cycle_at(&self, now: i64) -> Result<LockedRun<RefreshReport>> {
        let run = self
            .lock
            .run_exclusive(&self.lock_key, self.lock_ttl, self.refresh(now))
            .await?;

        match run {
            LockedRun::Skipped => Ok(LockedRun::Skipped),
            LockedRun::Completed(report) => report.map(LockedRun::Completed),
        }
    }

    async fn refresh(&self, now: i64) -> Result<RefreshReport> {
        let mut report = RefreshReport::default();
        report.enter(RefreshPhase::LockAcquired);

        report.enter(RefreshPhase::Cleaning);
        report.evicted = self.hot_set.evict_expired(now).await?;

        report.enter(RefreshPhase::Diffing);
        let valid = self.hot_set.valid_members(now).await?;
        let fresh = self.candidates.candidates().await?;
        report.fresh = fresh.len();
        report.cold_start = valid.is_empty();

        let mut seen = HashSet::with_capacity(fresh.len());
        let mut candidates = Vec::with_capacity(fresh.len());
        for address in fresh {
            if valid.contains(&address) {
                report.already_valid += 1;
            } else if seen.insert(address.clone()) {
                candidates.push(address);
            }
        }
        report.candidates = candidates.len();

        if candidates.is_empty() {
            info!(
                "Hot set {} up to date ({} valid, {} evicted)",
                self.hot_set.key(),
                valid.len(),
                report.evicted
            );
            report.enter(RefreshPhase::Idle);
            return Ok(report);
        }

        report.enter(RefreshPhase::Enriching);
        let mut enriched = Vec::with_capacity(candidates.len());
        for (index, batch) in candidates.chunks(self.batch_size).enumerate() {
            report.batches += 1;
            match self.enrich_batch(index, batch, now).await {
                Some(tokens) => {
                    report.unenriched += batch.len() - tokens.len();
                    enriched.extend(tokens);
                }
                None => report.skipped_batches += 1,
            }
        }

        report.enter(RefreshPhase::Committing);
        if !enriched.is_empty() {
            let members: Vec<String> = enriched.iter().map(|t| t.address.clone()).collect();
            report.expires_at = Some(self.hot_set.commit(&members, now).await?);
            report.committed = members.len();
        }

        report.enter(RefreshPhase::Idle);
        info!(
            "Refreshed hot set {}: {} committed, {} already valid, {} evicted, {}/{} batches skipped",
            self.hot_set.key(),
            report.committed,
            report.already_valid,
            report.evicted,
            report.skipped_batches,
            report.batches
        );
        Ok(report)
    }

    /// Enrich and persist one batch; `None` when the batch is skipped
    async fn enrich_batch(&self, index: usize, batch: &[String], now: i64) -> Option<Vec<EnrichedToken>> {
        let (metadata, safety) = tokio::join!(
            retry_with_backoff(&self.retry, "metadata lookup", || {
                self.repository.fetch_metadata(batch)
            }),
            retry_with_backoff(&self.retry, "safety check", || self.safety.check(batch)),
        );

        if let (Err(metadata_error), Err(safety_error)) = (&metadata, &safety) {
            warn!(
                "Skipping batch {} ({} tokens): metadata lookup failed: {}; safety check failed: {}",
                index,
                batch.len(),
                metadata_error,
                safety_error
            );
            return None;
        }

        let mut slots: Vec<EnrichedToken> = batch
            .iter()
            .map(|address| EnrichedToken::new(address.clone(), now))
            .collect();
        let positions: HashMap<&str, usize> = batch
            .iter()
            .enumerate()
            .map(|(slot, address)| (address.as_str(), slot))
            .collect();

        match metadata {
            Ok(records) => {
                for record in records {
                    if let Some(&slot) = positions.get(record.address.as_str()) {
                        slots[slot].metadata = Some(record);
                    }
                }
            }
            Err(e) => warn!("Batch {}: metadata lookup failed, using safety data only: {}", index, e),
        }
        match safety {
            Ok(reports) => {
                for report in reports {
                    if let Some(&slot) = positions.get(report.address.as_str()) {
                        slots[slot].safety = Some(report);
                    }
                }
            }
            Err(e) => warn!("Batch {}: safety check failed, using metadata only: {}", index, e),
        }

        let tokens: Vec<EnrichedToken> = slots.into_iter().filter(EnrichedToken::is_enriched).collect();
        if tokens.is_empty() {
            debug!("Batch {}: no token could be enriched", index);
            return Some(tokens);
        }

        if let Err(e) = retry_with_backoff(&self.retry, "token upsert", || {
            self.repository.upsert(&tokens)
        })
        .await
        {
            warn!("Skipping batch {}: upsert of {} tokens failed: {}", index, tokens.len(), e);
            return None;
        }

        self.write_flags(&tokens).await;
        Some(tokens)
    }

    async fn write_flags(&self, tokens: &[EnrichedToken]) {
        let ttl_secs = self.hot_set.ttl().as_secs().max(1);
        let writes = tokens.iter().map(|token| async move {
            let key = token_flags_key(&token.address);
            let raw = match serde_json::to_string(&token.flags()) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Failed to serialize flags {}: {}", key, e);
                    return;
                }
            };
            if let Err(e) = self.cache.set_ex(&key, &raw, ttl_secs).await {
                warn!("Failed to write flags {}: {}", key, e);
            }
        });
        join_all(writes).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SafetyReport, TokenFlags, TokenMetadata};
    use crate::RankingError;
    use cache_common::MemoryCacheStore;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    const NOW: i64 = 1_700_000_000;
    const TTL: i64 = 900;

    fn unavailable(service: &'static str) -> RankingError {
        RankingError::UpstreamStatus {
            service,
            status: 503,
            body: "unavailable".to_string(),
        }
    }

    fn addresses(list: &[&str]) -> Vec<String> {
        list.iter().map(|a| a.to_string()).collect()
    }

    struct StaticCandidates {
        tokens: Vec<String>,
        delay: Duration,
    }

    impl StaticCandidates {
        fn new(tokens: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                tokens: addresses(tokens),
                delay: Duration::ZERO,
            })
        }

        fn slow(tokens: &[&str], delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                tokens: addresses(tokens),
                delay,
            })
        }
    }

    #[async_trait]
    impl CandidateSource for StaticCandidates {
        async fn candidates(&self) -> Result<Vec<String>> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.tokens.clone())
        }
    }

    #[derive(Default)]
    struct FakeRepository {
        /// Lookups of batches containing one of these fail permanently
        poisoned: HashSet<String>,
        transient_failures: AtomicU32,
        fail_upsert: bool,
        lookups: Mutex<Vec<Vec<String>>>,
        upserts: Mutex<Vec<Vec<EnrichedToken>>>,
    }

    impl FakeRepository {
        fn poisoned(addresses: &[&str]) -> Self {
            Self {
                poisoned: addresses.iter().map(|a| a.to_string()).collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl TokenRepository for FakeRepository {
        async fn fetch_metadata(&self, addresses: &[String]) -> Result<Vec<TokenMetadata>> {
            self.lookups.lock().await.push(addresses.to_vec());
            if addresses.iter().any(|a| self.poisoned.contains(a)) {
                return Err(unavailable("token service"));
            }
            if self.transient_failures.load(Ordering::SeqCst) > 0 {
                self.transient_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(unavailable("token service"));
            }
            Ok(addresses
                .iter()
                .map(|address| TokenMetadata {
                    address: address.clone(),
                    holder_count: Some(100),
                    ..Default::default()
                })
                .collect())
        }

        async fn upsert(&self, tokens: &[EnrichedToken]) -> Result<()> {
            if self.fail_upsert {
                return Err(unavailable("token service"));
            }
            self.upserts.lock().await.push(tokens.to_vec());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeSafety {
        poisoned: HashSet<String>,
        fail_all: bool,
    }

    impl FakeSafety {
        fn poisoned(addresses: &[&str]) -> Self {
            Self {
                poisoned: addresses.iter().map(|a| a.to_string()).collect(),
                fail_all: false,
            }
        }

        fn down() -> Self {
            Self {
                poisoned: HashSet::new(),
                fail_all: true,
            }
        }
    }

    #[async_trait]
    impl SafetyChecker for FakeSafety {
        async fn check(&self, addresses: &[String]) -> Result<Vec<SafetyReport>> {
            if self.fail_all || addresses.iter().any(|a| self.poisoned.contains(a)) {
                return Err(unavailable("safety api"));
            }
            Ok(addresses
                .iter()
                .map(|address| SafetyReport {
                    address: address.clone(),
                    liquidity_usd: 10_000.0,
                    pair_count: 1,
                    price_usd: Some(1.0),
                    low_liquidity: false,
                    honeypot: Some(false),
                    mintable: Some(true),
                })
                .collect())
        }
    }

    fn config(batch_size: usize) -> RankingConfig {
        RankingConfig {
            enrichment_batch_size: batch_size,
            hot_set_ttl_secs: TTL as u64,
            ..Default::default()
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 2.0,
            jitter: false,
        }
    }

    fn refresher(
        store: &MemoryCacheStore,
        candidates: Arc<dyn CandidateSource>,
        repository: Arc<FakeRepository>,
        safety: FakeSafety,
        batch_size: usize,
    ) -> HotTokenRefresher {
        HotTokenRefresher::new(
            candidates,
            repository,
            Arc::new(safety),
            Arc::new(store.clone()),
            &config(batch_size),
        )
        .with_retry(fast_retry())
    }

    fn completed(run: LockedRun<RefreshReport>) -> RefreshReport {
        match run {
            LockedRun::Completed(report) => report,
            LockedRun::Skipped => panic!("cycle was skipped"),
        }
    }

    #[tokio::test]
    async fn cold_start_commits_every_fresh_token() {
        let store = MemoryCacheStore::new();
        let repository = Arc::new(FakeRepository::default());
        let refresher = refresher(
            &store,
            StaticCandidates::new(&["T1", "T2", "T3"]),
            repository.clone(),
            FakeSafety::default(),
            30,
        );

        let report = completed(refresher.run_cycle_at(NOW).await.unwrap());

        assert!(report.cold_start);
        assert_eq!(report.committed, 3);
        assert_eq!(report.expires_at, Some(NOW + TTL));
        assert_eq!(
            report.phases,
            vec![
                RefreshPhase::LockAcquired,
                RefreshPhase::Cleaning,
                RefreshPhase::Diffing,
                RefreshPhase::Enriching,
                RefreshPhase::Committing,
                RefreshPhase::Idle,
            ]
        );

        let hot = store.zset("hot:tokens").await;
        assert_eq!(hot.len(), 3);
        assert!(hot.values().all(|score| *score == NOW + TTL));
        assert_eq!(store.zadd_batches().await, 1);
        assert_eq!(repository.upserts.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn valid_tokens_are_not_rewritten() {
        let store = MemoryCacheStore::new();
        store.seed_zset("hot:tokens", &[("T1", NOW + 600)]).await;
        let repository = Arc::new(FakeRepository::default());
        let refresher = refresher(
            &store,
            StaticCandidates::new(&["T1", "T2"]),
            repository.clone(),
            FakeSafety::default(),
            30,
        );

        let report = completed(refresher.run_cycle_at(NOW).await.unwrap());

        assert!(!report.cold_start);
        assert_eq!(report.already_valid, 1);
        assert_eq!(report.candidates, 1);
        assert_eq!(*repository.lookups.lock().await, vec![addresses(&["T2"])]);

        let hot = store.zset("hot:tokens").await;
        assert_eq!(hot.get("T1"), Some(&(NOW + 600)));
        assert_eq!(hot.get("T2"), Some(&(NOW + TTL)));
    }

    #[tokio::test]
    async fn expired_members_are_evicted_and_re_enriched() {
        let store = MemoryCacheStore::new();
        store
            .seed_zset("hot:tokens", &[("T0", NOW - 1), ("T1", NOW)])
            .await;
        let refresher = refresher(
            &store,
            StaticCandidates::new(&["T0", "T1"]),
            Arc::new(FakeRepository::default()),
            FakeSafety::default(),
            30,
        );

        let report = completed(refresher.run_cycle_at(NOW).await.unwrap());

        assert_eq!(report.evicted, 1);
        assert_eq!(report.already_valid, 1);
        let hot = store.zset("hot:tokens").await;
        assert_eq!(hot.get("T0"), Some(&(NOW + TTL)));
        assert_eq!(hot.get("T1"), Some(&NOW));
    }

    #[tokio::test]
    async fn up_to_date_cache_skips_enrichment() {
        let store = MemoryCacheStore::new();
        store.seed_zset("hot:tokens", &[("T1", NOW + 60)]).await;
        let repository = Arc::new(FakeRepository::default());
        let refresher = refresher(
            &store,
            StaticCandidates::new(&["T1"]),
            repository.clone(),
            FakeSafety::default(),
            30,
        );

        let report = completed(refresher.run_cycle_at(NOW).await.unwrap());

        assert_eq!(report.committed, 0);
        assert_eq!(report.phases.last(), Some(&RefreshPhase::Idle));
        assert!(!report.phases.contains(&RefreshPhase::Enriching));
        assert!(repository.lookups.lock().await.is_empty());
        assert_eq!(store.zadd_batches().await, 0);
    }

    #[tokio::test]
    async fn concurrent_cycles_run_once() {
        let store = MemoryCacheStore::new();
        let candidates = StaticCandidates::slow(&["T1"], Duration::from_millis(50));
        let first = refresher(
            &store,
            candidates.clone(),
            Arc::new(FakeRepository::default()),
            FakeSafety::default(),
            30,
        );
        let second = refresher(
            &store,
            candidates,
            Arc::new(FakeRepository::default()),
            FakeSafety::default(),
            30,
        );

        let (a, b) = tokio::join!(first.run_cycle_at(NOW), second.run_cycle_at(NOW));
        let runs = [a.unwrap(), b.unwrap()];

        assert_eq!(runs.iter().filter(|run| run.is_skipped()).count(), 1);
        assert_eq!(store.zset("hot:tokens").await.len(), 1);
        // Lock released once the winning cycle finished
        assert!(store.string("job:refresh:tokens").await.is_none());
    }

    #[tokio::test]
    async fn one_failed_source_keeps_the_other() {
        let store = MemoryCacheStore::new();
        let repository = Arc::new(FakeRepository::default());
        let refresher = refresher(
            &store,
            StaticCandidates::new(&["T1", "T2"]),
            repository.clone(),
            FakeSafety::down(),
            30,
        );

        let report = completed(refresher.run_cycle_at(NOW).await.unwrap());

        assert_eq!(report.committed, 2);
        let upserts = repository.upserts.lock().await;
        assert!(upserts[0].iter().all(|t| t.metadata.is_some() && t.safety.is_none()));
    }

    #[tokio::test]
    async fn batch_with_both_sources_failing_is_skipped() {
        let store = MemoryCacheStore::new();
        let refresher = refresher(
            &store,
            StaticCandidates::new(&["T1", "T2", "T3"]),
            Arc::new(FakeRepository::poisoned(&["T3"])),
            FakeSafety::poisoned(&["T3"]),
            2,
        );

        let report = completed(refresher.run_cycle_at(NOW).await.unwrap());

        assert_eq!(report.batches, 2);
        assert_eq!(report.skipped_batches, 1);
        let hot = store.zset("hot:tokens").await;
        assert_eq!(hot.keys().cloned().collect::<Vec<_>>(), addresses(&["T1", "T2"]));
    }

    #[tokio::test]
    async fn upsert_failure_skips_the_batch() {
        let store = MemoryCacheStore::new();
        let repository = Arc::new(FakeRepository {
            fail_upsert: true,
            ..Default::default()
        });
        let refresher = refresher(
            &store,
            StaticCandidates::new(&["T1"]),
            repository,
            FakeSafety::default(),
            30,
        );

        let report = completed(refresher.run_cycle_at(NOW).await.unwrap());

        assert_eq!(report.skipped_batches, 1);
        assert_eq!(report.committed, 0);
        assert!(store.zset("hot:tokens").await.is_empty());
        assert!(store.string("token:flags:T1").await.is_none());
    }

    #[tokio::test]
    async fn transient_lookup_failures_are_retried() {
        let store = MemoryCacheStore::new();
        let repository = Arc::new(FakeRepository {
            transient_failures: AtomicU32::new(2),
            ..Default::default()
        });
        let refresher = refresher(
            &store,
            StaticCandidates::new(&["T1"]),
            repository.clone(),
            FakeSafety::default(),
            30,
        );

        completed(refresher.run_cycle_at(NOW).await.unwrap());

        assert_eq!(repository.lookups.lock().await.len(), 3);
        let upserts = repository.upserts.lock().await;
        assert!(upserts[0][0].metadata.is_some());
    }

    #[tokio::test]
    async fn enriched_tokens_publish_flags() {
        let store = MemoryCacheStore::new();
        let refresher = refresher(
            &store,
            StaticCandidates::new(&["T1"]),
            Arc::new(FakeRepository::default()),
            FakeSafety::default(),
            30,
        );

        completed(refresher.run_cycle_at(NOW).await.unwrap());

        let raw = store.string("token:flags:T1").await.unwrap();
        let flags: TokenFlags = serde_json::from_str(&raw).unwrap();
        assert_eq!(flags.holder_count, Some(100));
        assert_eq!(flags.liquidity_usd, Some(10_000.0));
        assert!(!flags.low_liquidity);
        assert!(!flags.honeypot);
        assert!(flags.mintable);

        // Flags live as long as the hot-set entry
        let ttl = store.ttl("token:flags:T1").await.unwrap();
        assert!(ttl <= Duration::from_secs(TTL as u64));
        assert!(ttl > Duration::from_secs(TTL as u64 - 5));
    }

    #[tokio::test]
    async fn cache_outage_fails_the_cycle() {
        let store = MemoryCacheStore::new();
        store.set_unavailable(true).await;
        let refresher = refresher(
            &store,
            StaticCandidates::new(&["T1"]),
            Arc::new(FakeRepository::default()),
            FakeSafety::default(),
            30,
        );

        assert!(matches!(
            refresher.run_cycle_at(NOW).await,
            Err(RankingError::Cache(_))
        ));
    }
}
