//! Solscan adapter: SPL token metadata including supply and decimals.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use super::http::send_json;
use super::{raw_amount, ScalarSource, TokenSupply};
use crate::error::ProviderError;

const PROVIDER: &str = "solscan";

pub const DEFAULT_BASE_URL: &str = "https://public-api.solscan.io";

#[derive(Clone)]
pub struct SolscanProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenMeta {
    #[serde(default)]
    supply: Value,
    decimals: Option<u32>,
}

impl SolscanProvider {
    pub fn new(client: Client, base_url: String, api_key: Option<String>) -> Self {
        Self { client, base_url, api_key }
    }
}

fn supply_from_meta(meta: &TokenMeta) -> Option<TokenSupply> {
    let decimals = meta.decimals.filter(|d| *d > 0)?;
    let raw = raw_amount(&meta.supply).filter(|raw| raw != "0")?;
    Some(TokenSupply { raw, decimals: Some(decimals) })
}

#[async_trait]
impl ScalarSource for SolscanProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn fetch_scalar(&self, identifier: &str) -> Result<Option<TokenSupply>, ProviderError> {
        let url = format!("{}/token/meta", self.base_url);
        let mut request = self.client.get(&url).query(&[("tokenAddress", identifier)]);
        if let Some(key) = &self.api_key {
            request = request.header("token", key);
        }

        let meta: Option<TokenMeta> = send_json(PROVIDER, request).await?;

        Ok(meta.as_ref().and_then(supply_from_meta))
    }
}
