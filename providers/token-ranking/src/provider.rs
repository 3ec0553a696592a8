use crate::{
    HotTokenRefresher, HttpSafetyChecker, HttpTokenRepository, RankQuery, RankedCandidates,
    RankingConfig, RankingPipeline, Result,
};
use cache_common::{CacheStore, JobScheduler, LockedRun, RedisCacheStore, RedisManager, RedisSettings};
use search_common::{ElasticsearchClient, SearchClientConfig, SearchIndex};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Token ranking provider: owns the client handles, the ranking pipeline and
/// the scheduled hot-token refresh
pub struct TokenRankingProvider {
    config: RankingConfig,
    pipeline: Arc<RankingPipeline>,
    refresher: Arc<HotTokenRefresher>,
    refresh_task: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl TokenRankingProvider {
    pub async fn new(config: RankingConfig) -> Result<Self> {
        info!("Initializing Token Ranking Provider");
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
                .with_timeout(config.search_timeout()),
        )?);

        let pipeline = Arc::new(RankingPipeline::from_config(search, cache.clone(), &config));
        let refresh_query = RankQuery::new(&config.refresh_window, config.refresh_limit)?;
        let candidates = Arc::new(RankedCandidates::new(pipeline.clone(), refresh_query));

        let repository = Arc::new(HttpTokenRepository::new(
            config.token_service_url.clone(),
            config.http_timeout(),
        )?);
        let safety = Arc::new(HttpSafetyChecker::new(
            config.safety_api_url.clone(),
            config.chain.clone(),
            config.min_liquidity_usd,
            config.http_timeout(),
        )?
        .with_security_api(config.token_security_url.clone()));

        let refresher = Arc::new(HotTokenRefresher::new(
            candidates, repository, safety, cache, &config,
        ));

        Ok(Self {
            config,
            pipeline,
            refresher,
            refresh_task: Arc::new(RwLock::new(None)),
        })
    }

    pub fn pipeline(&self) -> Arc<RankingPipeline> {
        self.pipeline.clone()
    }

    pub fn refresher(&self) -> Arc<HotTokenRefresher> {
        self.refresher.clone()
    }

    /// Spawn the cron-driven refresh loop
    pub async fn start_refresh_job(&self) -> Result<()> {
        let scheduler = JobScheduler::new("hot-token-refresh", &self.config.refresh_cron)?;
        let refresher = self.refresher.clone();

        let handle = tokio::spawn(async move {
            scheduler
                .run_loop(move || {
                    let refresher = refresher.clone();
                    async move {
                        match refresher.run_cycle().await? {
                            LockedRun::Skipped => debug!("Refresh cycle skipped"),
                            LockedRun::Completed(report) => {
                                debug!("Refresh cycle report: {:?}", report)
                            }
                        }
                        Ok::<(), crate::RankingError>(())
                    }
                })
                .await;
        });

        info!("Hot-token refresh scheduled ({})", self.config.refresh_cron);
        *self.refresh_task.write().await = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.refresh_task.write().await.take() {
            handle.abort();
        }
        info!("Token Ranking Provider stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_is_shareable() {
        fn assert_shareable<T: Send + Sync>() {}
        assert_shareable::<TokenRankingProvider>();
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_connecting() {
        let config = RankingConfig {
            enrichment_batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            TokenRankingProvider::new(config).await,
            Err(crate::RankingError::Configuration(_))
        ));
    }
}
