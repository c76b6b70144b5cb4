//! Coin market sync
//!
//! Replaces the exchange tickers of every coin with a CoinGecko id, one coin
//! at a time. Requests are paced, and rate limits or gateway errors pause the
//! loop before the next coin. A coin the source answers 404 for loses its id
//! and is not asked for again.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ProviderError, RepoError, SyncError};
use crate::jobs::scheduler::SyncTask;
use crate::models::SyncWindow;
use crate::providers::TickerSource;
use crate::services::repository::Repository;

pub const TASK_NAME: &str = "coin_market_sync";

pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60);
pub const DEFAULT_GATEWAY_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarketSyncReport {
    pub coins: usize,
    pub synced: usize,
    pub failed: usize,
    /// Coins whose id was cleared after a 404.
    pub delisted: usize,
}

pub struct CoinMarketSyncTask {
    repo: Arc<dyn Repository>,
    source: Arc<dyn TickerSource>,
    request_delay: Duration,
    rate_limit_backoff: Duration,
    gateway_backoff: Duration,
}

impl CoinMarketSyncTask {
    pub fn new(repo: Arc<dyn Repository>, source: Arc<dyn TickerSource>) -> Self {
        Self {
            repo,
            source,
            request_delay: DEFAULT_REQUEST_DELAY,
            rate_limit_backoff: DEFAULT_RATE_LIMIT_BACKOFF,
            gateway_backoff: DEFAULT_GATEWAY_BACKOFF,
        }
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn with_backoff(mut self, rate_limit: Duration, gateway: Duration) -> Self {
        self.rate_limit_backoff = rate_limit;
        self.gateway_backoff = gateway;
        self
    }

    /// Pause owed to the source after a failed request, if any.
    fn backoff_for(&self, err: &ProviderError) -> Option<Duration> {
        match err {
            ProviderError::RateLimited { .. } => Some(self.rate_limit_backoff),
            ProviderError::Status { status: 502..=504, .. } => Some(self.gateway_backoff),
            _ => None,
        }
    }

    /// Sync tickers of every coin with a source id, or of one coin uid.
    pub async fn sync(&self, uid: Option<&str>) -> Result<MarketSyncReport, SyncError> {
        let coins = self.repo.query_market_coins(uid).await?;

        let mut report = MarketSyncReport {
            coins: coins.len(),
            ..Default::default()
        };

        tracing::info!(coins = report.coins, "Syncing coin markets");

        for coin in &coins {
            match self.source.fetch_tickers(&coin.coingecko_id).await {
                Ok(tickers) => {
                    match self.repo.replace_coin_markets(coin.id, &tickers).await {
                        Ok(written) => {
                            tracing::debug!(coin = %coin.coingecko_id, tickers = written, "Replaced coin markets");
                            report.synced += 1;
                        }
                        Err(e @ RepoError::Connection(_)) => return Err(e.into()),
                        Err(e) => {
                            tracing::error!(coin = %coin.coingecko_id, error = %e, "Failed to store coin markets");
                            report.failed += 1;
                        }
                    }
                    tokio::time::sleep(self.request_delay).await;
                }
                Err(ProviderError::Status { status: 404, .. }) => {
                    tracing::warn!(coin = %coin.coingecko_id, "Coin unknown to CoinGecko, clearing its id");
                    self.repo.clear_coingecko_id(coin.id).await?;
                    report.delisted += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    match self.backoff_for(&e) {
                        Some(pause) => {
                            tracing::warn!(
                                coin = %coin.coingecko_id,
                                error = %e,
                                pause_secs = pause.as_secs(),
                                "Failed to fetch tickers, backing off"
                            );
                            tokio::time::sleep(pause).await;
                        }
                        None => {
                            tracing::error!(coin = %coin.coingecko_id, error = %e, "Failed to fetch tickers");
                        }
                    }
                }
            }
        }

        tracing::info!(
            coins = report.coins,
            synced = report.synced,
            failed = report.failed,
            delisted = report.delisted,
            "Synced coin markets"
        );

        Ok(report)
    }
}

#[async_trait]
impl SyncTask for CoinMarketSyncTask {
    fn name(&self) -> &str {
        TASK_NAME
    }

    async fn incremental(&self, _window: &SyncWindow) -> Result<(), SyncError> {
        self.sync(None).await?;
        Ok(())
    }
}
