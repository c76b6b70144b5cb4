//! Construction of the database, provider adapters and tasks from config.
//!
//! Shared by the daemon and the one-shot binaries. Adapters whose
//! credentials are missing are left out and logged.

use sea_orm::{Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;

use crate::config::SyncerConfig;
use crate::jobs::address_sync::AddressSyncTask;
use crate::jobs::coin_market_sync::CoinMarketSyncTask;
use crate::providers::bigquery::{self, BigQueryProvider, WarehouseQuery};
use crate::providers::bitquery::{self, BitqueryNetwork, BitqueryProvider};
use crate::providers::coingecko::{self, CoinGeckoProvider};
use crate::providers::defillama::{self, DefiLlamaProvider};
use crate::providers::explorer::{ExplorerProvider, EXPLORERS};
use crate::providers::http::{build_client, HEAVY_TIMEOUT_FACTOR};
use crate::providers::solscan::{self, SolscanProvider};
use crate::providers::tronscan::{self, TronscanProvider};
use crate::services::aggregator::Aggregator;
use crate::services::repository::Repository;
use crate::services::supply_resolver::SupplyResolver;

/// Connect to Postgres and apply pending migrations.
pub async fn connect_database(config: &SyncerConfig) -> Result<DatabaseConnection, DbErr> {
    tracing::info!("Connecting to database...");
    let db = Database::connect(&config.database_url).await?;

    tracing::info!("Running migrations...");
    migration::Migrator::up(&db, None).await?;

    Ok(db)
}

pub fn address_task(config: &SyncerConfig, repo: Arc<dyn Repository>) -> AddressSyncTask {
    let client = build_client(config.provider_timeout);
    let aggregator = Aggregator::new(repo.clone(), config.upsert_batch_size);

    let mut task = AddressSyncTask::new(repo, aggregator)
        .with_chunk_delay(config.chunk_delay)
        .with_pinned(config.pinned_address.clone());

    match &config.bigquery {
        Some(credentials) => {
            let heavy = build_client(config.provider_timeout * HEAVY_TIMEOUT_FACTOR);
            let base_url = config
                .bigquery_url
                .clone()
                .unwrap_or_else(|| bigquery::DEFAULT_BASE_URL.to_string());

            let warehouse = |sql: &str, query| {
                Arc::new(BigQueryProvider::new(
                    heavy.clone(),
                    base_url.clone(),
                    credentials.project.clone(),
                    credentials.access_token.clone(),
                    sql.to_string(),
                    query,
                ))
            };

            task = task.with_warehouse(
                warehouse(&config.address_stats_sql, WarehouseQuery::TokenStats),
                warehouse(&config.address_stats_btc_sql, WarehouseQuery::BtcBasedStats),
            );
        }
        None => tracing::warn!("BIGQUERY_PROJECT or BIGQUERY_ACCESS_TOKEN not set - warehouse address stats disabled"),
    }

    match &config.bitquery_api_key {
        Some(api_key) => {
            let base_url = config
                .bitquery_url
                .clone()
                .unwrap_or_else(|| bitquery::DEFAULT_BASE_URL.to_string());

            for network in [BitqueryNetwork::Bsc, BitqueryNetwork::Solana] {
                let provider = BitqueryProvider::new(client.clone(), api_key.clone(), base_url.clone(), network);
                task = task.with_transfers(network, Arc::new(provider));
            }
        }
        None => tracing::warn!("BITQUERY_API_KEY not set - transfer address stats disabled"),
    }

    task
}

pub fn supply_resolver(config: &SyncerConfig, repo: Arc<dyn Repository>) -> SupplyResolver {
    let client = build_client(config.provider_timeout);

    let registry = DefiLlamaProvider::new(client.clone(), defillama::DEFAULT_STABLECOINS_URL.to_string());

    let mut resolver = SupplyResolver::new(repo, Arc::new(registry))
        .with_delay(config.supply_lookup_delay)
        .with_tron(Arc::new(TronscanProvider::new(
            client.clone(),
            tronscan::DEFAULT_BASE_URL.to_string(),
            config.tronscan_api_key.clone(),
        )))
        .with_solana(Arc::new(SolscanProvider::new(
            client.clone(),
            solscan::DEFAULT_BASE_URL.to_string(),
            config.solscan_api_key.clone(),
        )));

    for endpoint in EXPLORERS {
        match config.explorer_keys.get(endpoint.chain_uid) {
            Some(key) => {
                let explorer = ExplorerProvider::new(client.clone(), endpoint, key.clone());
                resolver = resolver.with_explorer(endpoint.chain_uid, Arc::new(explorer));
            }
            None => tracing::debug!(explorer = endpoint.name, env = endpoint.key_env, "Explorer key not set, skipping"),
        }
    }

    resolver
}

/// Market sync task, or `None` without a CoinGecko key.
pub fn coin_market_task(config: &SyncerConfig, repo: Arc<dyn Repository>) -> Option<CoinMarketSyncTask> {
    let Some(api_key) = &config.coingecko_api_key else {
        tracing::warn!("COINGECKO_API_KEY not set - coin market sync disabled");
        return None;
    };

    let base_url = config
        .coingecko_url
        .clone()
        .unwrap_or_else(|| coingecko::DEFAULT_COINGECKO_URL.to_string());
    let provider = CoinGeckoProvider::new(build_client(config.provider_timeout), api_key.clone(), base_url);

    Some(CoinMarketSyncTask::new(repo, Arc::new(provider)).with_request_delay(config.coin_market_request_delay))
}
