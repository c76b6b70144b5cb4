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

    // Optional comma-separated coin uids, e.g. "tether,usd-coin"
    let uids: Option<Vec<String>> = env::args().nth(1).map(|arg| {
        arg.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    });

    let config = SyncerConfig::from_env()?;
    let db = wiring::connect_database(&config).await?;
    let repo: Arc<dyn Repository> = Arc::new(SeaOrmRepository::new(db));

    let resolver = wiring::supply_resolver(&config, repo);

    match &uids {
        Some(uids) => tracing::info!(uids = ?uids, "Syncing circulating supply for selected coins"),
        None => tracing::info!("Syncing circulating supply for all coins"),
    }

    let report = resolver.sync(uids.as_deref()).await?;

    tracing::info!(
        candidates = report.candidates,
        updated = report.updated,
        unresolved = report.unresolved,
        "✅ Circulating supply sync complete"
    );

    Ok(())
}
