use std::env;
use std::sync::Arc;

use metrics_syncer::config::SyncerConfig;
use metrics_syncer::jobs::address_sync::backfill_groups;
use metrics_syncer::jobs::scheduler::SyncTask;
use metrics_syncer::services::repository::{Repository, SeaOrmRepository};
use metrics_syncer::{logging, wiring};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    logging::init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let groups = backfill_groups();
    let names: Vec<&str> = groups.iter().map(|g| g.name).collect();

    // Get group from command line args
    let args: Vec<String> = env::args().collect();
    let Some(group) = args.get(1).and_then(|name| groups.iter().find(|g| g.name == name.as_str())) else {
        eprintln!("Usage: cargo run --bin backfill_addresses <{}>", names.join("|"));
        eprintln!("Example: cargo run --bin backfill_addresses bsc");
        std::process::exit(1);
    };

    let config = SyncerConfig::from_env()?;
    let db = wiring::connect_database(&config).await?;
    let repo: Arc<dyn Repository> = Arc::new(SeaOrmRepository::new(db));

    let task = wiring::address_task(&config, repo);

    tracing::info!(group = group.name, types = ?group.types, "Starting forced address backfill");

    // Runs regardless of existing coverage
    match task.historical(group).await {
        Ok(()) => {
            tracing::info!(group = group.name, "✅ Address backfill complete");
            Ok(())
        }
        Err(e) => {
            tracing::error!(group = group.name, error = %e, "❌ Address backfill failed");
            Err(e.into())
        }
    }
}
