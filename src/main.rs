use std::sync::Arc;

use metrics_syncer::config::SyncerConfig;
use metrics_syncer::jobs::circulating_supply_sync::CirculatingSupplySyncTask;
use metrics_syncer::jobs::scheduler::Scheduler;
use metrics_syncer::models::SyncInterval;
use metrics_syncer::services::repository::{Repository, SeaOrmRepository};
use metrics_syncer::{logging, wiring};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    logging::init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = SyncerConfig::from_env()?;

    let db = wiring::connect_database(&config).await?;
    let repo: Arc<dyn Repository> = Arc::new(SeaOrmRepository::new(db));

    let address_task = Arc::new(wiring::address_task(&config, repo.clone()));
    let supply_task = Arc::new(CirculatingSupplySyncTask::new(Arc::new(
        wiring::supply_resolver(&config, repo.clone()),
    )));

    let market_task = wiring::coin_market_task(&config, repo.clone());

    let mut scheduler = Scheduler::new(repo);
    scheduler
        .register("address_sync_30m", SyncInterval::ThirtyMinutes, address_task.clone())
        .register("address_sync_1d", SyncInterval::OneDay, address_task)
        .register("circulating_supply_sync", config.supply_sync_interval, supply_task);

    if let Some(market_task) = market_task {
        scheduler.register("coin_market_sync", config.coin_market_sync_interval, Arc::new(market_task));
    }

    let handle = scheduler.start();

    tracing::info!("🚀 Metrics syncer running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutdown requested, waiting for running syncs to finish");
    handle.shutdown();
    handle.wait().await;

    Ok(())
}
