//! # Token Ranking Provider Binary
//!
//! Runs the scheduled hot-token refresh until interrupted.

use anyhow::{Context, Result};
use tracing::info;

use token_ranking_provider::{RankingConfig, TokenRankingProvider};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with environment filter
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("token_ranking_provider=info".parse()?)
                .add_directive("cache_common=info".parse()?)
                .add_directive("search_common=info".parse()?),
        )
        .init();

    info!("Starting Token Ranking Provider");

    let config = RankingConfig::from_env().context("Failed to load configuration")?;
    info!(
        "Alias: {}, hot set: {} (ttl {}s), refresh: {}",
        config.transactions_alias, config.hot_set_key, config.hot_set_ttl_secs, config.refresh_cron
    );

    let provider = TokenRankingProvider::new(config)
        .await
        .context("Failed to create Token Ranking provider")?;
    provider
        .start_refresh_job()
        .await
        .context("Failed to schedule hot-token refresh")?;

    info!("Provider ready");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    provider.shutdown().await;
    info!("Token Ranking Provider shutdown complete");
    Ok(())
}
