#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};

use metrics_syncer::error::{ProviderError, RepoError};
use metrics_syncer::models::{
    CatalogEntry, Direction, MarketCoin, MarketTicker, MetricKey, MetricRecord, ProviderRow, SupplyCandidate, SyncInterval, SyncWindow, TokenRef,
    TransferRow,
};
use metrics_syncer::providers::{
    AggregateSource, DirectionalSource, ScalarSource, StablecoinRegistry, StablecoinSupplies, TickerSource,
    TokenSupply,
};
use metrics_syncer::services::repository::Repository;

/// Repository double keeping everything in memory.
#[derive(Default)]
pub struct InMemoryRepository {
    pub catalog: Mutex<Vec<CatalogEntry>>,
    pub records: Mutex<HashMap<MetricKey, MetricRecord>>,
    /// Size of every `bulk_upsert` call, in order.
    pub upsert_calls: Mutex<Vec<usize>>,
    /// Errors returned by the next `bulk_upsert` calls, front first.
    pub upsert_failures: Mutex<VecDeque<Option<RepoError>>>,
    pub catalog_failure: Mutex<Option<RepoError>>,
    pub deletions: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    pub rollups: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>, SyncInterval)>>,
    pub candidates: Mutex<Vec<SupplyCandidate>>,
    pub hints: Mutex<HashMap<i32, Decimal>>,
    pub task_runs: Mutex<Vec<(String, Option<String>)>>,
    /// (coin uid, coin) pairs visible to the market sync.
    pub market_coins: Mutex<Vec<(String, MarketCoin)>>,
    pub markets: Mutex<HashMap<i32, Vec<MarketTicker>>>,
    /// Error returned by the next `replace_coin_markets` call.
    pub market_failure: Mutex<Option<RepoError>>,
}

impl InMemoryRepository {
    pub fn with_catalog(entries: Vec<CatalogEntry>) -> Self {
        let repo = Self::default();
        *repo.catalog.lock() = entries;
        repo
    }

    /// Store records directly, bypassing call tracking.
    pub fn seed(&self, records: &[MetricRecord]) {
        let mut stored = self.records.lock();
        for record in records {
            stored.insert(record.key(), record.clone());
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    pub fn stored(&self) -> Vec<MetricRecord> {
        self.records.lock().values().cloned().collect()
    }

    pub fn stored_for(&self, entity_id: i32) -> Vec<MetricRecord> {
        self.stored().into_iter().filter(|r| r.entity_id == entity_id).collect()
    }

    pub fn stored_with(&self, period: SyncInterval) -> Vec<MetricRecord> {
        let mut records: Vec<_> = self.stored().into_iter().filter(|r| r.period == period).collect();
        records.sort_by_key(|r| (r.entity_id, r.timestamp));
        records
    }

    pub fn with_market_coins(coins: &[(&str, i32, &str)]) -> Self {
        let repo = Self::default();
        *repo.market_coins.lock() = coins
            .iter()
            .map(|(uid, id, coingecko_id)| {
                (
                    uid.to_string(),
                    MarketCoin {
                        id: *id,
                        coingecko_id: coingecko_id.to_string(),
                    },
                )
            })
            .collect();
        repo
    }

    pub fn markets_for(&self, coin_id: i32) -> Vec<MarketTicker> {
        self.markets.lock().get(&coin_id).cloned().unwrap_or_default()
    }

    fn entity_type(&self, entity_id: i32) -> Option<String> {
        self.catalog
            .lock()
            .iter()
            .find(|e| e.id == entity_id)
            .map(|e| e.entity_type.clone())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn exists_for_entity_group(&self, types: &[&str]) -> Result<bool, RepoError> {
        let ids: Vec<i32> = self.records.lock().keys().map(|k| k.0).collect();
        Ok(ids
            .into_iter()
            .filter_map(|id| self.entity_type(id))
            .any(|t| types.contains(&t.as_str())))
    }

    async fn bulk_upsert(&self, records: &[MetricRecord]) -> Result<u64, RepoError> {
        self.upsert_calls.lock().push(records.len());

        if let Some(Some(err)) = self.upsert_failures.lock().pop_front() {
            return Err(err);
        }

        let mut stored = self.records.lock();
        for record in records {
            stored.insert(record.key(), record.clone());
        }
        Ok(records.len() as u64)
    }

    async fn rollup_points(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        into: SyncInterval,
    ) -> Result<u64, RepoError> {
        self.rollups.lock().push((from, to, into));

        let step = into.step().num_seconds();
        let mut totals: HashMap<(i32, i64), Decimal> = HashMap::new();
        let mut stored = self.records.lock();
        for record in stored.values() {
            let finer = record.period.is_intraday() && record.period.step() < into.step();
            if finer && record.timestamp >= from && record.timestamp < to {
                let ts = record.timestamp.timestamp();
                let bucket = ts - ts.rem_euclid(step);
                *totals.entry((record.entity_id, bucket)).or_default() += record.value;
            }
        }

        let written = totals.len() as u64;
        for ((entity_id, bucket), value) in totals {
            let timestamp = Utc.timestamp_opt(bucket, 0).unwrap();
            let record = MetricRecord {
                entity_id,
                timestamp,
                period: into,
                value,
            };
            stored.insert(record.key(), record);
        }
        Ok(written)
    }

    async fn delete_expired(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<u64, RepoError> {
        self.deletions.lock().push((from, to));

        let mut stored = self.records.lock();
        let before = stored.len();
        stored.retain(|_, r| !(r.period.is_intraday() && r.timestamp >= from && r.timestamp < to));
        Ok((before - stored.len()) as u64)
    }

    async fn update_hint(&self, entity_id: i32, value: Decimal) -> Result<(), RepoError> {
        self.hints.lock().insert(entity_id, value);
        Ok(())
    }

    async fn query_catalog(
        &self,
        types: &[&str],
        _with_decimals: bool,
        with_address: bool,
    ) -> Result<Vec<CatalogEntry>, RepoError> {
        if let Some(err) = self.catalog_failure.lock().take() {
            return Err(err);
        }

        Ok(self
            .catalog
            .lock()
            .iter()
            .filter(|e| types.contains(&e.entity_type.as_str()))
            .filter(|e| !with_address || e.address.is_some())
            .cloned()
            .collect())
    }

    async fn query_supply_candidates(&self, uids: Option<&[String]>) -> Result<Vec<SupplyCandidate>, RepoError> {
        Ok(self
            .candidates
            .lock()
            .iter()
            .filter(|c| uids.is_none_or(|uids| uids.contains(&c.coin_uid)))
            .cloned()
            .collect())
    }

    async fn query_market_coins(&self, uid: Option<&str>) -> Result<Vec<MarketCoin>, RepoError> {
        Ok(self
            .market_coins
            .lock()
            .iter()
            .filter(|(coin_uid, _)| uid.is_none_or(|uid| uid == coin_uid))
            .map(|(_, coin)| coin.clone())
            .collect())
    }

    async fn replace_coin_markets(&self, coin_id: i32, tickers: &[MarketTicker]) -> Result<u64, RepoError> {
        if let Some(err) = self.market_failure.lock().take() {
            return Err(err);
        }

        self.markets.lock().insert(coin_id, tickers.to_vec());
        Ok(tickers.len() as u64)
    }

    async fn clear_coingecko_id(&self, coin_id: i32) -> Result<(), RepoError> {
        self.market_coins.lock().retain(|(_, coin)| coin.id != coin_id);
        Ok(())
    }

    async fn record_task_run(&self, lane: &str, _window: &SyncWindow, error: Option<&str>) -> Result<(), RepoError> {
        self.task_runs
            .lock()
            .push((lane.to_string(), error.map(str::to_string)));
        Ok(())
    }
}

pub fn token(id: i32, entity_type: &str, address: &str, decimals: Option<u32>) -> CatalogEntry {
    CatalogEntry {
        id,
        entity_type: entity_type.to_string(),
        address: Some(address.to_string()),
        decimals,
    }
}

pub fn chain(id: i32, entity_type: &str) -> CatalogEntry {
    CatalogEntry {
        id,
        entity_type: entity_type.to_string(),
        address: None,
        decimals: None,
    }
}

/// Deterministic EVM-style address for index `i`.
pub fn evm_address(i: usize) -> String {
    format!("0x{:040x}", i)
}

/// Transfer source answering with `accounts_per_currency` senders and the
/// same number of receivers for every requested currency.
#[derive(Default)]
pub struct FakeTransfers {
    pub accounts_per_currency: usize,
    /// Zero-based chunk (senders call) that fails with a transport-like error.
    pub fail_on_chunk: Option<usize>,
    pub calls: Mutex<Vec<(Direction, Vec<String>)>>,
}

impl FakeTransfers {
    pub fn new(accounts_per_currency: usize) -> Self {
        Self {
            accounts_per_currency,
            ..Default::default()
        }
    }

    pub fn failing_on(mut self, chunk: usize) -> Self {
        self.fail_on_chunk = Some(chunk);
        self
    }

    pub fn chunk_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(d, _)| *d == Direction::Senders)
            .count()
    }
}

#[async_trait]
impl DirectionalSource for FakeTransfers {
    async fn fetch_directional(
        &self,
        direction: Direction,
        _window: &SyncWindow,
        identifiers: &[TokenRef],
    ) -> Result<Vec<TransferRow>, ProviderError> {
        let chunk = {
            let mut calls = self.calls.lock();
            calls.push((direction, identifiers.iter().map(|t| t.address.clone()).collect()));
            calls.iter().filter(|(d, _)| *d == Direction::Senders).count() - 1
        };

        if self.fail_on_chunk == Some(chunk) {
            return Err(ProviderError::Status {
                provider: "fake",
                status: 502,
                body: "bad gateway".to_string(),
            });
        }

        let mut rows = Vec::new();
        for token in identifiers {
            for i in 0..self.accounts_per_currency {
                // Account 0 both sends and receives
                let account = match (direction, i) {
                    (_, 0) => "shared".to_string(),
                    (Direction::Senders, i) => format!("sender-{}", i),
                    (Direction::Receivers, i) => format!("receiver-{}", i),
                };
                rows.push(TransferRow::new(token.address.clone(), account));
            }
        }
        Ok(rows)
    }
}

/// Aggregate source returning fixed rows, or an error.
pub struct FakeAggregate {
    pub rows: Vec<ProviderRow>,
    pub fail: bool,
    pub calls: Mutex<Vec<SyncWindow>>,
}

impl FakeAggregate {
    pub fn new(rows: Vec<ProviderRow>) -> Self {
        Self {
            rows,
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            rows: Vec::new(),
            fail: true,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AggregateSource for FakeAggregate {
    async fn fetch_aggregate(
        &self,
        window: &SyncWindow,
        _entity_hints: &[TokenRef],
    ) -> Result<Vec<ProviderRow>, ProviderError> {
        self.calls.lock().push(*window);
        if self.fail {
            return Err(ProviderError::RateLimited { provider: "fake" });
        }
        Ok(self.rows.clone())
    }
}

/// Supply source backed by a map of address -> supply.
#[derive(Default)]
pub struct FakeSupply {
    pub supplies: HashMap<String, TokenSupply>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeSupply {
    pub fn with(mut self, address: &str, raw: &str, decimals: Option<u32>) -> Self {
        self.supplies.insert(
            address.to_string(),
            TokenSupply {
                raw: raw.to_string(),
                decimals,
            },
        );
        self
    }
}

#[async_trait]
impl ScalarSource for FakeSupply {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn fetch_scalar(&self, identifier: &str) -> Result<Option<TokenSupply>, ProviderError> {
        self.calls.lock().push(identifier.to_string());
        Ok(self.supplies.get(identifier).cloned())
    }
}

#[derive(Default)]
pub struct FakeRegistry {
    pub supplies: StablecoinSupplies,
}

#[async_trait]
impl StablecoinRegistry for FakeRegistry {
    async fn circulating_by_chain(&self) -> Result<StablecoinSupplies, ProviderError> {
        Ok(self.supplies.clone())
    }
}

pub fn ticker(base: &str, target: &str, market: &str) -> MarketTicker {
    MarketTicker {
        base: base.to_string(),
        target: target.to_string(),
        price: Some(Decimal::ONE),
        volume: Some(Decimal::TEN),
        volume_usd: Some(Decimal::TEN),
        market_uid: market.to_lowercase(),
        market_name: market.to_string(),
    }
}

/// Ticker source answering from a map of coingecko id -> outcome.
///
/// Ids without an entry answer with an empty ticker list.
#[derive(Default)]
pub struct FakeTickers {
    pub responses: Mutex<HashMap<String, Result<Vec<MarketTicker>, ProviderError>>>,
    /// Requested ids with the tokio clock at request time.
    pub calls: Mutex<Vec<(String, tokio::time::Instant)>>,
}

impl FakeTickers {
    pub fn with(self, coingecko_id: &str, tickers: Vec<MarketTicker>) -> Self {
        self.responses.lock().insert(coingecko_id.to_string(), Ok(tickers));
        self
    }

    pub fn failing(self, coingecko_id: &str, err: ProviderError) -> Self {
        self.responses.lock().insert(coingecko_id.to_string(), Err(err));
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(id, _)| id.clone()).collect()
    }
}

#[async_trait]
impl TickerSource for FakeTickers {
    async fn fetch_tickers(&self, coingecko_id: &str) -> Result<Vec<MarketTicker>, ProviderError> {
        self.calls
            .lock()
            .push((coingecko_id.to_string(), tokio::time::Instant::now()));

        match self.responses.lock().remove(coingecko_id) {
            Some(outcome) => outcome,
            None => Ok(Vec::new()),
        }
    }
}
