use crate::{MigrationJob, MigratorConfig, ReindexCoordinator, Result};
use cache_common::{CacheStore, JobScheduler, LockedRun, RedisCacheStore, RedisManager, RedisSettings};
use search_common::{ElasticsearchClient, SearchClientConfig, SearchIndex};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::info;

/// Index migrator provider: wires the clients and schedules the migration job
pub struct IndexMigratorProvider {
    config: MigratorConfig,
    job: Arc<MigrationJob>,
    migration_task: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl IndexMigratorProvider {
    pub async fn new(config: MigratorConfig) -> Result<Self> {
        info!("Initializing Index Migrator Provider");
        config.validate()?;

        let redis = Arc::new(
            RedisManager::new(
                &RedisSettings::new(config.redis_url.clone())
                    .with_pool_size(config.redis_pool_size),
            )
            .await?,
        );
        let cache: Arc<dyn CacheStore> = Arc::new(RedisCacheStore::new(redis));

        let search: Arc<dyn SearchIndex> = Arc::new(ElasticsearchClient::new(
            SearchClientConfig::new(config.search_url.clone())
                .with_credentials(config.search_username.clone(), config.search_password.clone())
                .with_timeout(config.request_timeout()),
        )?);

        let coordinator = Arc::new(ReindexCoordinator::new(search, &config));
        let job = Arc::new(MigrationJob::new(
            coordinator,
            cache,
            config.alias.clone(),
            config.lock_ttl(),
        ));

        Ok(Self {
            config,
            job,
            migration_task: Arc::new(RwLock::new(None)),
        })
    }

    pub fn job(&self) -> Arc<MigrationJob> {
        self.job.clone()
    }

    /// Spawn the cron-driven migration loop
    pub async fn start_migration_job(&self) -> Result<()> {
        let scheduler = JobScheduler::new("index-migration", &self.config.migration_cron)?;
        let job = self.job.clone();

        let handle = tokio::spawn(async move {
            scheduler
                .run_loop(move || {
                    let job = job.clone();
                    async move {
                        if let LockedRun::Completed(report) = job.run_once().await? {
                            info!(
                                "Migration of {} finished: {:?}",
                                report.generation.alias, report.outcome
                            );
                        }
                        Ok::<(), crate::MigrationError>(())
                    }
                })
                .await;
        });

        info!(
            "Migration of {} scheduled ({})",
            self.config.alias, self.config.migration_cron
        );
        *self.migration_task.write().await = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.migration_task.write().await.take() {
            handle.abort();
        }
        info!("Index Migrator Provider stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_is_shareable() {
        fn assert_shareable<T: Send + Sync>() {}
        assert_shareable::<IndexMigratorProvider>();
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_connecting() {
        let config = MigratorConfig {
            lookback_days: 0,
            ..Default::default()
        };
        assert!(matches!(
            IndexMigratorProvider::new(config).await,
            Err(crate::MigrationError::Configuration(_))
        ));
    }
}
