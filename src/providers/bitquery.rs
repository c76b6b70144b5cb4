//! Bitquery GraphQL adapter
//!
//! Lists the unique accounts sending or receiving a set of currencies within
//! a window. Results are grouped by Bitquery per (currency, account) pair.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

use super::http::send_json;
use super::DirectionalSource;
use crate::error::ProviderError;
use crate::models::{Direction, SyncWindow, TokenRef, TransferRow};

const PROVIDER: &str = "bitquery";

pub const DEFAULT_BASE_URL: &str = "https://graphql.bitquery.io";

/// Maximum rows requested per query.
const RESULT_LIMIT: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitqueryNetwork {
    Bsc,
    Solana,
}

impl BitqueryNetwork {
    pub fn as_str(&self) -> &'static str {
        match self {
            BitqueryNetwork::Bsc => "bsc",
            BitqueryNetwork::Solana => "solana",
        }
    }

    /// Catalog platform type whose tokens live on this network.
    pub fn platform_type(&self) -> &'static str {
        match self {
            BitqueryNetwork::Bsc => "bep20",
            BitqueryNetwork::Solana => "solana",
        }
    }

    fn root_field(&self) -> &'static str {
        match self {
            BitqueryNetwork::Bsc => "ethereum(network: bsc)",
            BitqueryNetwork::Solana => "solana",
        }
    }
}

#[derive(Clone)]
pub struct BitqueryProvider {
    client: Client,
    api_key: String,
    base_url: String,
    network: BitqueryNetwork,
}

#[derive(Debug, Deserialize)]
struct GraphResponse {
    data: Option<HashMap<String, Option<NetworkTransfers>>>,
    #[serde(default)]
    errors: Vec<GraphError>,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct NetworkTransfers {
    #[serde(default)]
    transfers: Vec<TransferNode>,
}

#[derive(Debug, Deserialize)]
struct TransferNode {
    currency: AddressNode,
    account: AddressNode,
}

#[derive(Debug, Deserialize)]
struct AddressNode {
    address: String,
}

impl BitqueryProvider {
    pub fn new(client: Client, api_key: String, base_url: String, network: BitqueryNetwork) -> Self {
        Self {
            client,
            api_key,
            base_url,
            network,
        }
    }

    pub fn network(&self) -> BitqueryNetwork {
        self.network
    }

    fn build_query(&self, direction: Direction) -> String {
        let side = match direction {
            Direction::Senders => "sender",
            Direction::Receivers => "receiver",
        };

        format!(
            r#"query ($from: ISO8601DateTime, $till: ISO8601DateTime, $currencies: [String!], $limit: Int!) {{
  {root} {{
    transfers(
      options: {{limit: $limit}}
      time: {{since: $from, till: $till}}
      currency: {{in: $currencies}}
    ) {{
      currency {{ address }}
      account: {side} {{ address }}
    }}
  }}
}}"#,
            root = self.network.root_field(),
            side = side,
        )
    }
}

#[async_trait]
impl DirectionalSource for BitqueryProvider {
    async fn fetch_directional(
        &self,
        direction: Direction,
        window: &SyncWindow,
        identifiers: &[TokenRef],
    ) -> Result<Vec<TransferRow>, ProviderError> {
        if identifiers.is_empty() {
            return Ok(Vec::new());
        }

        let currencies: Vec<&str> = identifiers.iter().map(|t| t.address.as_str()).collect();

        tracing::debug!(
            network = self.network.as_str(),
            direction = direction.as_str(),
            currencies = currencies.len(),
            window = %window,
            "Fetching transfer accounts from Bitquery"
        );

        let body = json!({
            "query": self.build_query(direction),
            "variables": {
                "from": window.from.to_rfc3339(),
                "till": window.to.to_rfc3339(),
                "currencies": currencies,
                "limit": RESULT_LIMIT,
            }
        });

        let request = self
            .client
            .post(&self.base_url)
            .header("X-API-KEY", &self.api_key)
            .json(&body);

        let response: GraphResponse = send_json(PROVIDER, request).await?;

        if let Some(err) = response.errors.first() {
            return Err(ProviderError::decode(PROVIDER, err.message.clone()));
        }

        let rows = response
            .data
            .into_iter()
            .flat_map(|data| data.into_values())
            .flatten()
            .flat_map(|network| network.transfers)
            .map(|node| TransferRow::new(node.currency.address, node.account.address))
            .collect();

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(network: BitqueryNetwork) -> BitqueryProvider {
        BitqueryProvider::new(
            Client::new(),
            "key".to_string(),
            DEFAULT_BASE_URL.to_string(),
            network,
        )
    }

    #[test]
    fn test_query_selects_requested_side() {
        let query = provider(BitqueryNetwork::Bsc).build_query(Direction::Receivers);
        assert!(query.contains("ethereum(network: bsc)"));
        assert!(query.contains("account: receiver"));

        let query = provider(BitqueryNetwork::Solana).build_query(Direction::Senders);
        assert!(query.starts_with("query"));
        assert!(query.contains("account: sender"));
    }

    #[test]
    fn test_response_decoding() {
        let raw = r#"{"data":{"ethereum":{"transfers":[
            {"currency":{"address":"0xaa"},"account":{"address":"0x01"}},
            {"currency":{"address":"0xaa"},"account":{"address":"0x02"}}
        ]}}}"#;
        let response: GraphResponse = serde_json::from_str(raw).unwrap();
        let transfers = response
            .data
            .unwrap()
            .into_values()
            .flatten()
            .flat_map(|n| n.transfers)
            .count();
        assert_eq!(transfers, 2);
    }

    #[test]
    fn test_network_platform_types() {
        assert_eq!(BitqueryNetwork::Bsc.platform_type(), "bep20");
        assert_eq!(BitqueryNetwork::Solana.platform_type(), "solana");
    }
}
