//! Chunked, rate-limited fetching
//!
//! Large identifier sets are split into bounded chunks that are requested one
//! after another, with a fixed pause after every round trip. The pause is the
//! provider rate-limit contract and applies after failures too.
//!
//! Failure isolation is per window: the first failing chunk aborts the fetch
//! and rows gathered from earlier chunks are dropped.

use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use crate::error::ProviderError;
use crate::models::{Direction, ProviderRow, SyncWindow, TokenRef, TransferRow};
use crate::providers::DirectionalSource;
use crate::services::entity_resolver::normalize_identifier;

/// Default pause after each chunk round trip.
pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_secs(4);

/// Split `identifiers` into request chunks.
///
/// When `pinned` is set it always gets its own leading chunk, and is removed
/// from the remainder, which is split into chunks of `chunk_size` in order.
pub fn partition(identifiers: &[TokenRef], chunk_size: usize, pinned: Option<&str>) -> Vec<Vec<TokenRef>> {
    let chunk_size = chunk_size.max(1);
    let pinned = pinned.map(normalize_identifier);

    let remainder: Vec<TokenRef> = identifiers
        .iter()
        .filter(|t| pinned.as_deref() != Some(normalize_identifier(&t.address).as_str()))
        .cloned()
        .collect();

    let mut chunks = Vec::with_capacity(remainder.len() / chunk_size + 2);

    if let Some(address) = pinned {
        let pinned_ref = identifiers
            .iter()
            .find(|t| normalize_identifier(&t.address) == address)
            .cloned()
            .unwrap_or_else(|| TokenRef::new(address));
        chunks.push(vec![pinned_ref]);
    }

    chunks.extend(remainder.chunks(chunk_size).map(<[TokenRef]>::to_vec));
    chunks
}

/// Union of transfer accounts per currency, in first-seen order.
///
/// Currencies are keyed by their normalized identifier, so case variants of
/// one EVM address share a single account set.
#[derive(Debug, Default)]
pub struct TransferUnion {
    index: HashMap<String, usize>,
    currencies: Vec<(String, Vec<String>)>,
    seen: HashMap<String, HashSet<String>>,
}

impl TransferUnion {
    pub fn add(&mut self, row: TransferRow) {
        let currency = normalize_identifier(&row.currency);
        let position = match self.index.get(&currency) {
            Some(&position) => position,
            None => {
                self.currencies.push((currency.clone(), Vec::new()));
                self.index.insert(currency.clone(), self.currencies.len() - 1);
                self.currencies.len() - 1
            }
        };

        let seen = self.seen.entry(currency).or_default();
        if seen.insert(row.account.clone()) {
            self.currencies[position].1.push(row.account);
        }
    }

    /// Unique accounts per currency.
    pub fn accounts(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.currencies
            .iter()
            .map(|(currency, accounts)| (currency.as_str(), accounts.as_slice()))
    }

    /// One row per currency carrying its unique-account count.
    pub fn into_rows(self, window: &SyncWindow) -> Vec<ProviderRow> {
        self.currencies
            .into_iter()
            .map(|(currency, accounts)| ProviderRow::new(currency, window.to, Decimal::from(accounts.len())))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ChunkedFetcher {
    chunk_size: usize,
    delay: Duration,
    pinned: Option<String>,
}

impl ChunkedFetcher {
    pub fn new(chunk_size: usize, delay: Duration) -> Self {
        Self {
            chunk_size,
            delay,
            pinned: None,
        }
    }

    /// Give `address` its own leading chunk on every fetch.
    pub fn with_pinned(mut self, address: impl Into<String>) -> Self {
        self.pinned = Some(address.into());
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn plan(&self, identifiers: &[TokenRef]) -> Vec<Vec<TokenRef>> {
        partition(identifiers, self.chunk_size, self.pinned.as_deref())
    }

    /// Run `fetch_chunk` sequentially over every chunk and concatenate results.
    pub async fn fetch<T, F, Fut>(&self, identifiers: &[TokenRef], mut fetch_chunk: F) -> Result<Vec<T>, ProviderError>
    where
        F: FnMut(Vec<TokenRef>) -> Fut,
        Fut: Future<Output = Result<Vec<T>, ProviderError>>,
    {
        let chunks = self.plan(identifiers);
        let total = chunks.len();
        let mut merged = Vec::new();

        for (i, chunk) in chunks.into_iter().enumerate() {
            tracing::debug!(chunk = i + 1, total = total, size = chunk.len(), "Fetching chunk");

            let result = fetch_chunk(chunk).await;

            // Rate-limit pause regardless of the outcome
            tokio::time::sleep(self.delay).await;

            match result {
                Ok(rows) => merged.extend(rows),
                Err(e) => {
                    tracing::warn!(
                        chunk = i + 1,
                        total = total,
                        error = %e,
                        "Chunk failed, abandoning window"
                    );
                    return Err(e);
                }
            }
        }

        Ok(merged)
    }

    /// Count unique senders and receivers per currency over `window`.
    pub async fn fetch_transfer_counts(
        &self,
        source: &dyn DirectionalSource,
        window: &SyncWindow,
        identifiers: &[TokenRef],
    ) -> Result<Vec<ProviderRow>, ProviderError> {
        let transfers = self
            .fetch(identifiers, |chunk| async move {
                let mut rows = source
                    .fetch_directional(Direction::Senders, window, &chunk)
                    .await?;
                rows.extend(
                    source
                        .fetch_directional(Direction::Receivers, window, &chunk)
                        .await?,
                );
                Ok(rows)
            })
            .await?;

        let mut union = TransferUnion::default();
        for row in transfers {
            union.add(row);
        }

        Ok(union.into_rows(window))
    }
}
