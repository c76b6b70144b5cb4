//! DefiLlama stablecoin registry
//!
//! Circulating supply per stablecoin and chain, normalized to catalog coin
//! and chain uids. The normalized map is cached for an hour.

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::http::send_json;
use super::{StablecoinRegistry, StablecoinSupplies};
use crate::error::ProviderError;

const PROVIDER: &str = "defillama";

pub const DEFAULT_STABLECOINS_URL: &str = "https://stablecoins.llama.fi";

const CACHE_KEY: &str = "stablecoins";

/// DefiLlama chain name -> catalog chain uid.
const CHAIN_UIDS: [(&str, &str); 11] = [
    ("Ethereum", "ethereum"),
    ("BSC", "binance-smart-chain"),
    ("Optimism", "optimistic-ethereum"),
    ("Arbitrum", "arbitrum-one"),
    ("Polygon", "polygon-pos"),
    ("Avalanche", "avalanche"),
    ("Cronos", "cronos"),
    ("Fantom", "fantom"),
    ("Celo", "celo"),
    ("Tron", "tron"),
    ("Solana", "solana"),
];

#[derive(Clone)]
pub struct DefiLlamaProvider {
    client: Client,
    base_url: String,
    cache: Arc<Cache<String, StablecoinSupplies>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StablecoinsResponse {
    #[serde(default)]
    pegged_assets: Vec<PeggedAsset>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeggedAsset {
    gecko_id: Option<String>,
    #[serde(default)]
    chain_circulating: HashMap<String, ChainCirculating>,
}

#[derive(Debug, Deserialize)]
struct ChainCirculating {
    #[serde(default)]
    current: HashMap<String, Value>,
}

impl DefiLlamaProvider {
    pub fn new(client: Client, base_url: String) -> Self {
        let cache = Cache::builder()
            .max_capacity(1)
            .time_to_live(Duration::from_secs(3600)) // 1 hour TTL
            .build();

        Self {
            client,
            base_url,
            cache: Arc::new(cache),
        }
    }
}

fn chain_uid(name: &str) -> Option<&'static str> {
    CHAIN_UIDS.iter().find(|(n, _)| *n == name).map(|(_, uid)| *uid)
}

fn normalize(assets: Vec<PeggedAsset>) -> StablecoinSupplies {
    let mut supplies: StablecoinSupplies = HashMap::new();

    for asset in assets {
        let Some(uid) = asset.gecko_id else {
            continue;
        };

        let mut by_chain = HashMap::new();
        for (chain, circulating) in asset.chain_circulating {
            let Some(chain_uid) = chain_uid(&chain) else {
                continue;
            };

            // One peg currency per asset ("peggedUSD", "peggedEUR", ...)
            let amount = circulating
                .current
                .values()
                .find_map(|v| v.as_f64())
                .and_then(Decimal::from_f64_retain);

            if let Some(amount) = amount {
                by_chain.insert(chain_uid.to_string(), amount);
            }
        }

        if !by_chain.is_empty() {
            supplies.insert(uid, by_chain);
        }
    }

    supplies
}

#[async_trait]
impl StablecoinRegistry for DefiLlamaProvider {
    async fn circulating_by_chain(&self) -> Result<StablecoinSupplies, ProviderError> {
        if let Some(cached) = self.cache.get(CACHE_KEY).await {
            tracing::debug!("Cache hit for stablecoins");
            return Ok(cached);
        }

        tracing::info!("Fetching stablecoins from DefiLlama");

        let url = format!("{}/stablecoins", self.base_url);
        let response: StablecoinsResponse = send_json(PROVIDER, self.client.get(&url)).await?;
        let supplies = normalize(response.pegged_assets);

        tracing::info!(stablecoins = supplies.len(), "Fetched stablecoin supplies");

        self.cache.insert(CACHE_KEY.to_string(), supplies.clone()).await;

        Ok(supplies)
    }
}
