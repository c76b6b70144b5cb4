//! Etherscan-family explorer adapters
//!
//! All explorers in the table share the `module=stats&action=tokensupply`
//! endpoint. They report the raw supply only; decimals come from the catalog.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use super::http::send_json;
use super::{raw_amount, ScalarSource, TokenSupply};
use crate::error::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExplorerEndpoint {
    /// Chain uid as used by the catalog
    pub chain_uid: &'static str,
    pub name: &'static str,
    pub base_url: &'static str,
    /// Environment variable holding the API key
    pub key_env: &'static str,
}

pub const EXPLORERS: [ExplorerEndpoint; 9] = [
    ExplorerEndpoint { chain_uid: "ethereum", name: "etherscan", base_url: "https://api.etherscan.io/api", key_env: "ETHERSCAN_KEY" },
    ExplorerEndpoint { chain_uid: "binance-smart-chain", name: "bscscan", base_url: "https://api.bscscan.com/api", key_env: "BSCSCAN_KEY" },
    ExplorerEndpoint { chain_uid: "optimistic-ethereum", name: "optimistic-etherscan", base_url: "https://api-optimistic.etherscan.io/api", key_env: "OPTIMISTIC_ETHERSCAN_KEY" },
    ExplorerEndpoint { chain_uid: "arbitrum-one", name: "arbiscan", base_url: "https://api.arbiscan.io/api", key_env: "ARBISCAN_KEY" },
    ExplorerEndpoint { chain_uid: "polygon-pos", name: "polygonscan", base_url: "https://api.polygonscan.com/api", key_env: "POLYGONSCAN_KEY" },
    ExplorerEndpoint { chain_uid: "avalanche", name: "snowtrace", base_url: "https://api.snowtrace.io/api", key_env: "SNOWTRACE_KEY" },
    ExplorerEndpoint { chain_uid: "cronos", name: "cronoscan", base_url: "https://api.cronoscan.com/api", key_env: "CRONOSCAN_KEY" },
    ExplorerEndpoint { chain_uid: "fantom", name: "ftmscan", base_url: "https://api.ftmscan.com/api", key_env: "FTMSCAN_KEY" },
    ExplorerEndpoint { chain_uid: "celo", name: "celoscan", base_url: "https://api.celoscan.io/api", key_env: "CELOSCAN_KEY" },
];

pub fn endpoint_for_chain(chain_uid: &str) -> Option<&'static ExplorerEndpoint> {
    EXPLORERS.iter().find(|s| s.chain_uid == chain_uid)
}

#[derive(Clone)]
pub struct ExplorerProvider {
    client: Client,
    endpoint: ExplorerEndpoint,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: Option<String>,
    #[serde(default)]
    result: Value,
}

impl ExplorerProvider {
    pub fn new(client: Client, endpoint: ExplorerEndpoint, api_key: String) -> Self {
        Self { client, endpoint, api_key }
    }
}

fn supply_from_response(response: ExplorerResponse) -> Option<TokenSupply> {
    if response.status.as_deref() == Some("0") {
        return None;
    }

    raw_amount(&response.result)
        .filter(|raw| raw.chars().all(|c| c.is_ascii_digit()) && raw != "0")
        .map(|raw| TokenSupply { raw, decimals: None })
}

#[async_trait]
impl ScalarSource for ExplorerProvider {
    fn name(&self) -> &'static str {
        self.endpoint.name
    }

    async fn fetch_scalar(&self, identifier: &str) -> Result<Option<TokenSupply>, ProviderError> {
        tracing::debug!(explorer = self.endpoint.name, address = %identifier, "Fetching token supply");

        let request = self.client.get(self.endpoint.base_url).query(&[
            ("module", "stats"),
            ("action", "tokensupply"),
            ("contractaddress", identifier),
            ("apikey", self.api_key.as_str()),
        ]);

        let response: ExplorerResponse = send_json(self.endpoint.name, request).await?;

        Ok(supply_from_response(response))
    }
}
