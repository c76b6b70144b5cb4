use std::env;
use std::sync::Arc;

use metrics_syncer::config::SyncerConfig;
use metrics_syncer::services::repository::{Repository, SeaOrmRepository};
use metrics_syncer::{logging, wiring};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    logging::init();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Optional coin uid, e.g. "bitcoin"
    let uid = env::args().nth(1).filter(|arg| !arg.trim().is_empty());

    let config = SyncerConfig::from_env()?;
    let db = wiring::connect_database(&config).await?;
    let repo: Arc<dyn Repository> = Arc::new(SeaOrmRepository::new(db));

    let Some(task) = wiring::coin_market_task(&config, repo) else {
        return Err("COINGECKO_API_KEY must be set".into());
    };

    match &uid {
        Some(uid) => tracing::info!(uid = %uid, "Syncing coin markets for one coin"),
        None => tracing::info!("Syncing coin markets for all coins"),
    }

    let report = task.sync(uid.as_deref()).await?;

    tracing::info!(
        coins = report.coins,
        synced = report.synced,
        failed = report.failed,
        delisted = report.delisted,
        "✅ Coin market sync complete"
    );

    Ok(())
}
