//! CoinGecko exchange tickers
//!
//! Reads the ticker page of `/coins/{id}`. Numbers arrive as JSON floats and
//! are kept as `Decimal` with their float precision.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::TickerSource;
use super::http::send_json;
use crate::error::ProviderError;
use crate::models::MarketTicker;

const PROVIDER: &str = "coingecko";

pub const DEFAULT_COINGECKO_URL: &str = "https://pro-api.coingecko.com/api/v3";

#[derive(Clone)]
pub struct CoinGeckoProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CoinResponse {
    #[serde(default)]
    tickers: Vec<TickerEntry>,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    base: String,
    target: String,
    market: TickerMarket,
    last: Option<f64>,
    volume: Option<f64>,
    #[serde(default)]
    converted_volume: ConvertedVolume,
}

#[derive(Debug, Deserialize)]
struct TickerMarket {
    name: String,
    identifier: String,
}

#[derive(Debug, Default, Deserialize)]
struct ConvertedVolume {
    usd: Option<f64>,
}

impl CoinGeckoProvider {
    pub fn new(client: Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            api_key,
            base_url,
        }
    }
}

fn to_decimal(value: Option<f64>) -> Option<Decimal> {
    value.and_then(Decimal::from_f64_retain)
}

fn into_tickers(response: CoinResponse) -> Vec<MarketTicker> {
    response
        .tickers
        .into_iter()
        .map(|t| MarketTicker {
            base: t.base,
            target: t.target,
            price: to_decimal(t.last),
            volume: to_decimal(t.volume),
            volume_usd: to_decimal(t.converted_volume.usd),
            market_uid: t.market.identifier,
            market_name: t.market.name,
        })
        .collect()
}

#[async_trait]
impl TickerSource for CoinGeckoProvider {
    async fn fetch_tickers(&self, coingecko_id: &str) -> Result<Vec<MarketTicker>, ProviderError> {
        tracing::debug!("Fetching tickers for {} from CoinGecko", coingecko_id);

        let url = format!("{}/coins/{}", self.base_url, coingecko_id);
        let request = self
            .client
            .get(&url)
            .header("x-cg-pro-api-key", &self.api_key)
            .query(&[
                ("tickers", "true"),
                ("localization", "false"),
                ("market_data", "false"),
                ("community_data", "false"),
                ("developer_data", "false"),
            ]);

        let response: CoinResponse = send_json(PROVIDER, request).await?;
        Ok(into_tickers(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_tickers_keep_market_and_usd_volume() {
        let raw = r#"{"id":"bitcoin","tickers":[
            {"base":"BTC","target":"USDT","market":{"name":"Binance","identifier":"binance"},
             "last":64000.5,"volume":1200.25,"converted_volume":{"usd":76800000}},
            {"base":"BTC","target":"EUR","market":{"name":"Kraken","identifier":"kraken"},
             "last":null,"volume":3}
        ]}"#;
        let response: CoinResponse = serde_json::from_str(raw).unwrap();
        let tickers = into_tickers(response);

        assert_eq!(tickers.len(), 2);
        assert_eq!(tickers[0].market_uid, "binance");
        assert_eq!(tickers[0].market_name, "Binance");
        assert_eq!(tickers[0].price, Some(dec!(64000.5)));
        assert_eq!(tickers[0].volume, Some(dec!(1200.25)));
        assert_eq!(tickers[0].volume_usd, Some(dec!(76800000)));
        assert_eq!(tickers[1].target, "EUR");
        assert_eq!(tickers[1].price, None);
        assert_eq!(tickers[1].volume_usd, None);
    }

    #[test]
    fn test_missing_tickers_is_empty() {
        let response: CoinResponse = serde_json::from_str(r#"{"id":"ghost"}"#).unwrap();
        assert!(into_tickers(response).is_empty());
    }
}
