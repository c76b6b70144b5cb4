//! Tronscan adapter: TRC20 token info including its own decimals.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use super::http::send_json;
use super::{raw_amount, ScalarSource, TokenSupply};
use crate::error::ProviderError;

const PROVIDER: &str = "tronscan";

pub const DEFAULT_BASE_URL: &str = "https://apilist.tronscanapi.com/api";

#[derive(Clone)]
pub struct TronscanProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Trc20Response {
    #[serde(default)]
    trc20_tokens: Vec<Trc20Token>,
}

#[derive(Debug, Deserialize)]
struct Trc20Token {
    #[serde(default)]
    total_supply_with_decimals: Value,
    decimals: Option<u32>,
}

impl TronscanProvider {
    pub fn new(client: Client, base_url: String, api_key: Option<String>) -> Self {
        Self { client, base_url, api_key }
    }
}

fn supply_from_token(token: &Trc20Token) -> Option<TokenSupply> {
    // Zero decimals is treated as missing token info
    let decimals = token.decimals.filter(|d| *d > 0)?;
    let raw = raw_amount(&token.total_supply_with_decimals)?;
    Some(TokenSupply { raw, decimals: Some(decimals) })
}

#[async_trait]
impl ScalarSource for TronscanProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn fetch_scalar(&self, identifier: &str) -> Result<Option<TokenSupply>, ProviderError> {
        let url = format!("{}/token_trc20", self.base_url);
        let mut request = self.client.get(&url).query(&[("contract", identifier)]);
        if let Some(key) = &self.api_key {
            request = request.header("TRON-PRO-API-KEY", key);
        }

        let response: Trc20Response = send_json(PROVIDER, request).await?;

        Ok(response.trc20_tokens.first().and_then(supply_from_token))
    }
}
