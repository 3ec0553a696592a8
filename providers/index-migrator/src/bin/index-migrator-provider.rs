//! # Index Migrator Provider Binary
//!
//! Runs the scheduled migration until interrupted. With `--once` a single
//! migration runs immediately and the process exits.

use anyhow::{Context, Result};
use tracing::info;

use cache_common::LockedRun;
use index_migrator_provider::{IndexMigratorProvider, MigratorConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with environment filter
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("index_migrator_provider=info".parse()?)
                .add_directive("search_common=info".parse()?),
        )
        .init();

    info!("Starting Index Migrator Provider");

    let config = MigratorConfig::from_env().context("Failed to load configuration")?;
    info!(
        "Alias: {}, lookback: {}d, schedule: {}",
        config.alias, config.lookback_days, config.migration_cron
    );

    let provider = IndexMigratorProvider::new(config)
        .await
        .context("Failed to create Index Migrator provider")?;

    if std::env::args().any(|arg| arg == "--once") {
        match provider.job().run_once().await.context("Migration failed")? {
            LockedRun::Skipped => info!("Migration already running elsewhere"),
            LockedRun::Completed(report) => info!("Migration finished: {:?}", report.outcome),
        }
        return Ok(());
    }

    provider
        .start_migration_job()
        .await
        .context("Failed to schedule migration")?;

    info!("Provider ready");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    provider.shutdown().await;
    info!("Index Migrator Provider shutdown complete");
    Ok(())
}
