//! Syncer configuration
//!
//! Read from the process environment (after `dotenvy` has loaded `.env`).
//! Only `DATABASE_URL` is required; a provider whose key is missing is left
//! out of the wiring and its steps are skipped.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::SyncInterval;
use crate::providers::explorer::EXPLORERS;
use crate::providers::http::DEFAULT_TIMEOUT_SECS;

/// Default provider request timeout in seconds
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = DEFAULT_TIMEOUT_SECS;

/// Default pause after each chunk round trip (4 seconds)
const DEFAULT_CHUNK_DELAY_MS: u64 = 4_000;

/// Default cap on records per upsert batch
const DEFAULT_UPSERT_BATCH_SIZE: usize = 400_000;

/// Default pause between multi-chain supply lookups
const DEFAULT_SUPPLY_LOOKUP_DELAY_MS: u64 = 100;

/// BSC-USD (BUSDT) on BNB Smart Chain
const DEFAULT_PINNED_ADDRESS: &str = "0x55d398326f99059ff775485246999027b3197955";

const DEFAULT_SUPPLY_SYNC_INTERVAL: &str = "1d";

const DEFAULT_COIN_MARKET_SYNC_INTERVAL: &str = "30m";

/// Default pause after each ticker request (3 seconds)
const DEFAULT_COIN_MARKET_REQUEST_DELAY_MS: u64 = 3_000;

const DEFAULT_ADDRESS_STATS_SQL: &str = include_str!("../sql/address_stats.sql");
const DEFAULT_ADDRESS_STATS_BTC_SQL: &str = include_str!("../sql/address_stats_btc_based.sql");

const ENV_DATABASE_URL: &str = "DATABASE_URL";
const ENV_BITQUERY_API_KEY: &str = "BITQUERY_API_KEY";
const ENV_BITQUERY_URL: &str = "BITQUERY_URL";
const ENV_BIGQUERY_PROJECT: &str = "BIGQUERY_PROJECT";
const ENV_BIGQUERY_ACCESS_TOKEN: &str = "BIGQUERY_ACCESS_TOKEN";
const ENV_BIGQUERY_URL: &str = "BIGQUERY_URL";
const ENV_TRONSCAN_KEY: &str = "TRONSCAN_KEY";
const ENV_SOLSCAN_KEY: &str = "SOLSCAN_KEY";
const ENV_PROVIDER_TIMEOUT: &str = "PROVIDER_TIMEOUT_SECS";
const ENV_CHUNK_DELAY: &str = "SYNC_CHUNK_DELAY_MS";
const ENV_UPSERT_BATCH_SIZE: &str = "SYNC_UPSERT_BATCH_SIZE";
const ENV_SUPPLY_LOOKUP_DELAY: &str = "SUPPLY_LOOKUP_DELAY_MS";
const ENV_PINNED_ADDRESS: &str = "SYNC_PINNED_ADDRESS";
const ENV_ADDRESS_STATS_SQL_PATH: &str = "ADDRESS_STATS_SQL_PATH";
const ENV_ADDRESS_STATS_BTC_SQL_PATH: &str = "ADDRESS_STATS_BTC_SQL_PATH";
const ENV_SUPPLY_SYNC_INTERVAL: &str = "SUPPLY_SYNC_INTERVAL";
const ENV_COINGECKO_API_KEY: &str = "COINGECKO_API_KEY";
const ENV_COINGECKO_URL: &str = "COINGECKO_URL";
const ENV_COIN_MARKET_SYNC_INTERVAL: &str = "COIN_MARKET_SYNC_INTERVAL";
const ENV_COIN_MARKET_REQUEST_DELAY: &str = "COIN_MARKET_REQUEST_DELAY_MS";

/// Credentials for the BigQuery REST API.
#[derive(Debug, Clone)]
pub struct WarehouseCredentials {
    pub project: String,
    pub access_token: String,
}

#[derive(Debug, Clone)]
pub struct SyncerConfig {
    pub database_url: String,
    pub bitquery_api_key: Option<String>,
    pub bitquery_url: Option<String>,
    pub bigquery: Option<WarehouseCredentials>,
    pub bigquery_url: Option<String>,
    /// Explorer API keys by catalog chain uid.
    pub explorer_keys: HashMap<&'static str, String>,
    pub tronscan_api_key: Option<String>,
    pub solscan_api_key: Option<String>,
    pub provider_timeout: Duration,
    pub chunk_delay: Duration,
    pub upsert_batch_size: usize,
    pub supply_lookup_delay: Duration,
    pub pinned_address: String,
    pub address_stats_sql: String,
    pub address_stats_btc_sql: String,
    pub supply_sync_interval: SyncInterval,
    pub coingecko_api_key: Option<String>,
    pub coingecko_url: Option<String>,
    pub coin_market_sync_interval: SyncInterval,
    pub coin_market_request_delay: Duration,
}

impl SyncerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_url = var(ENV_DATABASE_URL).ok_or(ConfigError::Missing(ENV_DATABASE_URL))?;

        let bigquery = match (var(ENV_BIGQUERY_PROJECT), var(ENV_BIGQUERY_ACCESS_TOKEN)) {
            (Some(project), Some(access_token)) => Some(WarehouseCredentials { project, access_token }),
            _ => None,
        };

        let explorer_keys = EXPLORERS
            .iter()
            .filter_map(|endpoint| var(endpoint.key_env).map(|key| (endpoint.chain_uid, key)))
            .collect();

        let provider_timeout_secs: u64 = var(ENV_PROVIDER_TIMEOUT)
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PROVIDER_TIMEOUT_SECS);

        let chunk_delay_ms: u64 = var(ENV_CHUNK_DELAY)
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CHUNK_DELAY_MS);

        let upsert_batch_size: usize = var(ENV_UPSERT_BATCH_SIZE)
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_UPSERT_BATCH_SIZE);

        let supply_lookup_delay_ms: u64 = var(ENV_SUPPLY_LOOKUP_DELAY)
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SUPPLY_LOOKUP_DELAY_MS);

        let supply_sync_interval = SyncInterval::from_alias(
            &var(ENV_SUPPLY_SYNC_INTERVAL).unwrap_or_else(|| DEFAULT_SUPPLY_SYNC_INTERVAL.to_string()),
        );

        let coin_market_sync_interval = SyncInterval::from_alias(
            &var(ENV_COIN_MARKET_SYNC_INTERVAL).unwrap_or_else(|| DEFAULT_COIN_MARKET_SYNC_INTERVAL.to_string()),
        );

        let coin_market_request_delay_ms: u64 = var(ENV_COIN_MARKET_REQUEST_DELAY)
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_COIN_MARKET_REQUEST_DELAY_MS);

        Ok(Self {
            database_url,
            bitquery_api_key: var(ENV_BITQUERY_API_KEY),
            bitquery_url: var(ENV_BITQUERY_URL),
            bigquery,
            bigquery_url: var(ENV_BIGQUERY_URL),
            explorer_keys,
            tronscan_api_key: var(ENV_TRONSCAN_KEY),
            solscan_api_key: var(ENV_SOLSCAN_KEY),
            provider_timeout: Duration::from_secs(provider_timeout_secs),
            chunk_delay: Duration::from_millis(chunk_delay_ms),
            upsert_batch_size,
            supply_lookup_delay: Duration::from_millis(supply_lookup_delay_ms),
            pinned_address: var(ENV_PINNED_ADDRESS).unwrap_or_else(|| DEFAULT_PINNED_ADDRESS.to_string()),
            address_stats_sql: load_sql(var(ENV_ADDRESS_STATS_SQL_PATH), DEFAULT_ADDRESS_STATS_SQL)?,
            address_stats_btc_sql: load_sql(var(ENV_ADDRESS_STATS_BTC_SQL_PATH), DEFAULT_ADDRESS_STATS_BTC_SQL)?,
            supply_sync_interval,
            coingecko_api_key: var(ENV_COINGECKO_API_KEY),
            coingecko_url: var(ENV_COINGECKO_URL),
            coin_market_sync_interval,
            coin_market_request_delay: Duration::from_millis(coin_market_request_delay_ms),
        })
    }
}

fn load_sql(path: Option<String>, bundled: &str) -> Result<String, ConfigError> {
    match path {
        Some(path) => std::fs::read_to_string(&path).map_err(|source| ConfigError::Io { path, source }),
        None => Ok(bundled.to_string()),
    }
}
