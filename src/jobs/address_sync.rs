//! Address count sync
//!
//! Unique active addresses per platform. Ethereum, ERC20 tokens and
//! Bitcoin-derived chains come pre-aggregated from the warehouse; BEP20 and
//! Solana tokens are counted from Bitquery transfer senders and receivers.
//!
//! Registered on two lanes. `30m` fetches fresh points, folds the days they
//! fall in into `1d` totals and evicts the points that aged out. `1d`
//! finalizes the day that just closed and sweeps any intraday points older
//! than retention.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::error::SyncError;
use crate::jobs::scheduler::SyncTask;
use crate::models::{EntityGroup, SyncInterval, SyncWindow};
use crate::providers::bitquery::BitqueryNetwork;
use crate::providers::{AggregateSource, DirectionalSource};
use crate::services::aggregator::Aggregator;
use crate::services::backfill::BackfillController;
use crate::services::chunked_fetcher::{ChunkedFetcher, DEFAULT_CHUNK_DELAY};
use crate::services::entity_resolver::EntityResolver;
use crate::services::repository::Repository;

pub const TASK_NAME: &str = "address_sync";

/// Platform types served by the warehouse queries.
const WAREHOUSE_TYPES: [&str; 8] = [
    "bitcoin",
    "bitcoin-cash",
    "dash",
    "dogecoin",
    "litecoin",
    "zcash",
    "ethereum",
    "erc20",
];

/// Tokens per Bitquery request during backfill.
const HISTORICAL_CHUNK_SIZE: usize = 50;

/// Tokens per Bitquery request on the 30m lane.
const INCREMENTAL_CHUNK_SIZE: usize = 20;

pub const GROUP_ETH: &str = "eth";
pub const GROUP_BTC: &str = "btc";
pub const GROUP_BSC: &str = "bsc";
pub const GROUP_SOLANA: &str = "solana";

pub fn backfill_groups() -> Vec<EntityGroup> {
    vec![
        EntityGroup::new(GROUP_ETH, &["ethereum", "erc20"]),
        EntityGroup::new(GROUP_BTC, &["bitcoin"]),
        EntityGroup::new(GROUP_BSC, &["bep20"]),
        EntityGroup::new(GROUP_SOLANA, &["solana"]),
    ]
}

#[derive(Clone)]
pub struct AddressSyncTask {
    repo: Arc<dyn Repository>,
    aggregator: Aggregator,
    token_stats: Option<Arc<dyn AggregateSource>>,
    btc_stats: Option<Arc<dyn AggregateSource>>,
    bsc: Option<Arc<dyn DirectionalSource>>,
    solana: Option<Arc<dyn DirectionalSource>>,
    chunk_delay: std::time::Duration,
    pinned: Option<String>,
}

impl AddressSyncTask {
    pub fn new(repo: Arc<dyn Repository>, aggregator: Aggregator) -> Self {
        Self {
            repo,
            aggregator,
            token_stats: None,
            btc_stats: None,
            bsc: None,
            solana: None,
            chunk_delay: DEFAULT_CHUNK_DELAY,
            pinned: None,
        }
    }

    pub fn with_warehouse(mut self, token_stats: Arc<dyn AggregateSource>, btc_stats: Arc<dyn AggregateSource>) -> Self {
        self.token_stats = Some(token_stats);
        self.btc_stats = Some(btc_stats);
        self
    }

    pub fn with_transfers(mut self, network: BitqueryNetwork, source: Arc<dyn DirectionalSource>) -> Self {
        match network {
            BitqueryNetwork::Bsc => self.bsc = Some(source),
            BitqueryNetwork::Solana => self.solana = Some(source),
        }
        self
    }

    pub fn with_chunk_delay(mut self, delay: std::time::Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Contract always requested in its own leading chunk on BSC.
    pub fn with_pinned(mut self, address: impl Into<String>) -> Self {
        self.pinned = Some(address.into());
        self
    }

    fn transfers(&self, network: BitqueryNetwork) -> Option<&Arc<dyn DirectionalSource>> {
        match network {
            BitqueryNetwork::Bsc => self.bsc.as_ref(),
            BitqueryNetwork::Solana => self.solana.as_ref(),
        }
    }

    async fn sync_warehouse(&self, source: &dyn AggregateSource, window: &SyncWindow) -> Result<usize, SyncError> {
        let resolved = EntityResolver::build(self.repo.as_ref(), &WAREHOUSE_TYPES, true, false).await?;
        let rows = source.fetch_aggregate(window, resolved.list()).await?;

        tracing::info!(window = %window, rows = rows.len(), "Fetched warehouse address stats");

        self.aggregator.ingest(rows, &resolved, window.period).await
    }

    async fn sync_transfers(
        &self,
        network: BitqueryNetwork,
        source: &dyn DirectionalSource,
        window: &SyncWindow,
        chunk_size: usize,
    ) -> Result<usize, SyncError> {
        let resolved = EntityResolver::build(self.repo.as_ref(), &[network.platform_type()], false, true).await?;

        let mut fetcher = ChunkedFetcher::new(chunk_size, self.chunk_delay);
        // The pinned contract is a BEP20 address; Solana chunks never carry it
        if network == BitqueryNetwork::Bsc {
            if let Some(pinned) = &self.pinned {
                fetcher = fetcher.with_pinned(pinned.clone());
            }
        }

        let rows = fetcher
            .fetch_transfer_counts(source, window, resolved.list())
            .await?;

        tracing::info!(
            network = network.as_str(),
            window = %window,
            currencies = rows.len(),
            "Fetched transfer address counts"
        );

        self.aggregator.ingest(rows, &resolved, window.period).await
    }

    /// Warehouse backfill: the full 1d history, then the 30m history.
    async fn backfill_warehouse(&self, source: Option<&Arc<dyn AggregateSource>>, now: DateTime<Utc>) -> Result<(), SyncError> {
        let Some(source) = source else {
            tracing::warn!("Warehouse not configured, skipping backfill");
            return Ok(());
        };

        for interval in [SyncInterval::OneDay, SyncInterval::ThirtyMinutes] {
            let window = SyncWindow::historical(interval, now);
            let records = self.sync_warehouse(source.as_ref(), &window).await?;
            tracing::info!(window = %window, records = records, "Backfilled warehouse address stats");
        }

        Ok(())
    }

    /// Day-by-day Bitquery walk back to the 1d horizon.
    async fn backfill_transfers(&self, network: BitqueryNetwork, now: DateTime<Utc>) -> Result<(), SyncError> {
        let Some(source) = self.transfers(network) else {
            tracing::warn!(network = network.as_str(), "Bitquery not configured, skipping backfill");
            return Ok(());
        };

        let to = SyncWindow::current(SyncInterval::OneDay, now).to;
        let horizon = to - SyncInterval::OneDay.historical_horizon();

        BackfillController::new(Duration::days(1))
            .with_period(SyncInterval::OneDay)
            .run(horizon, to, |window| async move {
                self.sync_transfers(network, source.as_ref(), &window, HISTORICAL_CHUNK_SIZE)
                    .await
            })
            .await;

        Ok(())
    }

    async fn sync_latest(&self, window: &SyncWindow) -> Result<(), SyncError> {
        if let Some(source) = &self.token_stats {
            step("warehouse_tokens", self.sync_warehouse(source.as_ref(), window).await)?;
        }

        if let Some(source) = &self.btc_stats {
            step("warehouse_btc_based", self.sync_warehouse(source.as_ref(), window).await)?;
        }

        for network in [BitqueryNetwork::Bsc, BitqueryNetwork::Solana] {
            if let Some(source) = self.transfers(network) {
                let result = self
                    .sync_transfers(network, source.as_ref(), window, INCREMENTAL_CHUNK_SIZE)
                    .await;
                step(network.as_str(), result)?;
            }
        }

        // Days touched by this window still hold every intraday point
        let (from, to) = daily_span(window.from, window.to);
        step("rollup_daily", self.rollup(from, to).await)?;

        if let Some(expired) = window.expired_slice() {
            let result = self
                .repo
                .delete_expired(expired.from, expired.to)
                .await
                .map(|deleted| deleted as usize)
                .map_err(SyncError::from);
            step("evict_expired", result)?;
        }

        Ok(())
    }

    /// Finalize the closed day, then drop every intraday point older than
    /// the 30m retention.
    async fn sweep_expired(&self, window: &SyncWindow) -> Result<(), SyncError> {
        let (from, to) = daily_span(window.from, window.from);
        step("rollup_daily", self.rollup(from, to).await)?;

        let Some(retention) = SyncInterval::ThirtyMinutes.retention() else {
            return Ok(());
        };

        let deleted = self
            .repo
            .delete_expired(DateTime::UNIX_EPOCH, window.to - retention)
            .await?;

        tracing::info!(deleted = deleted, before = %(window.to - retention), "Swept expired points");
        Ok(())
    }

    async fn rollup(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<usize, SyncError> {
        let written = self.repo.rollup_points(from, to, SyncInterval::OneDay).await?;
        tracing::debug!(from = %from, to = %to, written = written, "Rolled up daily address stats");
        Ok(written as usize)
    }
}

/// Whole days on the 1d grid covering `first` through `last`, both
/// inclusive. A window's points are stamped at either of its ends.
fn daily_span(first: DateTime<Utc>, last: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let from = SyncWindow::current(SyncInterval::OneDay, first).to;
    let to = SyncWindow::current(SyncInterval::OneDay, last).to + SyncInterval::OneDay.step();
    (from, to)
}

/// Log a failed step; only unrecoverable errors stop the tick.
fn step(name: &str, result: Result<usize, SyncError>) -> Result<(), SyncError> {
    match result {
        Ok(records) => {
            tracing::info!(step = name, records = records, "Step complete");
            Ok(())
        }
        Err(e) if e.is_recoverable() => {
            tracing::error!(step = name, error = %e, "Step failed");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[async_trait]
impl SyncTask for AddressSyncTask {
    fn name(&self) -> &str {
        TASK_NAME
    }

    fn backfill_groups(&self) -> Vec<EntityGroup> {
        backfill_groups()
    }

    async fn historical(&self, group: &EntityGroup) -> Result<(), SyncError> {
        let now = Utc::now();

        match group.name {
            GROUP_ETH => self.backfill_warehouse(self.token_stats.as_ref(), now).await,
            GROUP_BTC => self.backfill_warehouse(self.btc_stats.as_ref(), now).await,
            GROUP_BSC => self.backfill_transfers(BitqueryNetwork::Bsc, now).await,
            GROUP_SOLANA => self.backfill_transfers(BitqueryNetwork::Solana, now).await,
            other => {
                tracing::warn!(group = other, "Unknown address backfill group");
                Ok(())
            }
        }
    }

    async fn incremental(&self, window: &SyncWindow) -> Result<(), SyncError> {
        match window.period {
            SyncInterval::ThirtyMinutes => self.sync_latest(window).await,
            SyncInterval::OneDay => self.sweep_expired(window).await,
            other => {
                tracing::debug!(period = %other, "No address sync for period");
                Ok(())
            }
        }
    }
}
