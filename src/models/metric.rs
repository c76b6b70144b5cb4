use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::sync_window::SyncInterval;

/// Normalized row produced by a provider adapter, before entity resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRow {
    /// Provider-native identifier: a contract address or a chain type.
    pub identifier: String,
    pub timestamp: DateTime<Utc>,
    pub value: Decimal,
}

impl ProviderRow {
    pub fn new(identifier: impl Into<String>, timestamp: DateTime<Utc>, value: Decimal) -> Self {
        Self {
            identifier: identifier.into(),
            timestamp,
            value,
        }
    }
}

/// One (entity, timestamp, period) observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    pub entity_id: i32,
    pub timestamp: DateTime<Utc>,
    pub period: SyncInterval,
    pub value: Decimal,
}

impl MetricRecord {
    pub fn key(&self) -> MetricKey {
        (self.entity_id, self.timestamp, self.period)
    }
}

/// Natural key of a metric record; upserts conflict on it.
pub type MetricKey = (i32, DateTime<Utc>, SyncInterval);

/// Identifier handed to a provider request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenRef {
    pub address: String,
    pub decimals: Option<u32>,
}

impl TokenRef {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            decimals: None,
        }
    }
}

/// Direction of a transfer query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Senders,
    Receivers,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Senders => "senders",
            Direction::Receivers => "receivers",
        }
    }
}

/// One account touching one currency in a transfer query result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransferRow {
    pub currency: String,
    pub account: String,
}

impl TransferRow {
    pub fn new(currency: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
            account: account.into(),
        }
    }
}
