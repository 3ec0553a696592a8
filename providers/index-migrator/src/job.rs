//! Scheduled migration entry point, one run per alias at a time

use crate::coordinator::{MigrationReport, ReindexCoordinator};
use crate::Result;
use cache_common::{reindex_lock_key, CacheStore, DistributedLock, LockedRun};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct MigrationJob {
    coordinator: Arc<ReindexCoordinator>,
    lock: DistributedLock,
    alias: String,
    lock_ttl: Duration,
}

impl MigrationJob {
    pub fn new(
        coordinator: Arc<ReindexCoordinator>,
        cache: Arc<dyn CacheStore>,
        alias: impl Into<String>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            coordinator,
            lock: DistributedLock::new(cache),
            alias: alias.into(),
            lock_ttl,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Migrate under `job:reindex:<alias>`; `Skipped` when another run holds it
    pub async fn run_once(&self) -> Result<LockedRun<MigrationReport>> {
        let key = reindex_lock_key(&self.alias);
        let run = self
            .lock
            .run_exclusive(&key, self.lock_ttl, self.coordinator.migrate(&self.alias))
            .await?;

        match run {
            LockedRun::Skipped => {
                info!("Migration of {} already running elsewhere", self.alias);
                Ok(LockedRun::Skipped)
            }
            LockedRun::Completed(report) => report.map(LockedRun::Completed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::tests::{coordinator, Cluster, FakeCluster};
    use crate::MigrationError;
    use cache_common::MemoryCacheStore;

    fn job(cluster: Arc<FakeCluster>, store: &MemoryCacheStore) -> MigrationJob {
        MigrationJob::new(
            Arc::new(coordinator(cluster)),
            Arc::new(store.clone()),
            "transactions",
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn held_lock_skips_the_run() {
        let store = MemoryCacheStore::new();
        store.seed_string("job:reindex:transactions", "other-owner").await;
        let cluster = FakeCluster::new(Cluster::with_alias("transactions_v1", 10));

        let run = job(cluster.clone(), &store).run_once().await.unwrap();

        assert!(run.is_skipped());
        assert!(cluster.state.lock().await.indices.contains_key("transactions_v1"));
        assert!(!cluster.state.lock().await.indices.contains_key("transactions_v2"));
    }

    #[tokio::test]
    async fn completed_run_releases_the_lock() {
        let store = MemoryCacheStore::new();
        let cluster = FakeCluster::new(Cluster::with_alias("transactions_v1", 10));

        let run = job(cluster, &store).run_once().await.unwrap();

        assert!(matches!(run, LockedRun::Completed(report) if report.generation.version == 2));
        assert!(store.string("job:reindex:transactions").await.is_none());
    }

    #[tokio::test]
    async fn failed_migration_still_releases_the_lock() {
        let store = MemoryCacheStore::new();
        let cluster = FakeCluster::new(Cluster::with_alias("transactions", 10));

        let result = job(cluster, &store).run_once().await;

        assert!(matches!(result, Err(MigrationError::UnrecognizedIndexName(_))));
        assert!(store.string("job:reindex:transactions").await.is_none());
    }
}
