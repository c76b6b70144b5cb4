//! Provider adapters
//!
//! Each external data source is reached through one of the capability traits
//! below. Adapters return an empty result (or `None`) on recoverable absence
//! such as an unknown contract, and an error on transport failure.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::error::ProviderError;
use crate::models::{Direction, MarketTicker, ProviderRow, SyncWindow, TokenRef, TransferRow};

pub mod bigquery;
pub mod bitquery;
pub mod coingecko;
pub mod defillama;
pub mod explorer;
pub mod http;
pub mod solscan;
pub mod tronscan;

/// Bulk-warehouse style source returning pre-aggregated rows for a window.
#[async_trait]
pub trait AggregateSource: Send + Sync {
    async fn fetch_aggregate(
        &self,
        window: &SyncWindow,
        entity_hints: &[TokenRef],
    ) -> Result<Vec<ProviderRow>, ProviderError>;
}

/// Graph-query style source listing the accounts on one side of transfers.
#[async_trait]
pub trait DirectionalSource: Send + Sync {
    async fn fetch_directional(
        &self,
        direction: Direction,
        window: &SyncWindow,
        identifiers: &[TokenRef],
    ) -> Result<Vec<TransferRow>, ProviderError>;
}

/// Raw token supply as reported on-chain.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSupply {
    /// Integer amount in the token's smallest unit.
    pub raw: String,
    /// Decimals reported by the source itself, if any.
    pub decimals: Option<u32>,
}

/// Source of a single number for one identifier.
#[async_trait]
pub trait ScalarSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_scalar(&self, identifier: &str) -> Result<Option<TokenSupply>, ProviderError>;
}

/// coin uid -> chain uid -> circulating supply (already in token units).
pub type StablecoinSupplies = HashMap<String, HashMap<String, Decimal>>;

#[async_trait]
pub trait StablecoinRegistry: Send + Sync {
    async fn circulating_by_chain(&self) -> Result<StablecoinSupplies, ProviderError>;
}

/// Exchange tickers quoting one coin.
#[async_trait]
pub trait TickerSource: Send + Sync {
    async fn fetch_tickers(&self, coingecko_id: &str) -> Result<Vec<MarketTicker>, ProviderError>;
}

/// Render an integer amount that a provider may encode as string or number.
pub(crate) fn raw_amount(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => n
            .as_u64()
            .map(|v| v.to_string())
            .or_else(|| n.as_f64().map(|v| format!("{:.0}", v))),
        _ => None,
    }
}
