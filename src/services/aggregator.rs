//! Aggregation and idempotent persistence of provider rows
//!
//! Rows from any adapter share the `ProviderRow` shape; this module resolves
//! them to platforms, collapses duplicate keys (last writer wins) and upserts
//! the result in bounded batches.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{RepoError, SyncError};
use crate::models::{MetricKey, MetricRecord, ProviderRow, SyncInterval};
use crate::services::entity_resolver::ResolvedEntities;
use crate::services::repository::Repository;

/// Default cap on records per upsert batch.
pub const DEFAULT_BATCH_SIZE: usize = 400_000;

#[derive(Debug, Default)]
pub struct Normalized {
    pub records: Vec<MetricRecord>,
    /// Rows dropped because their identifier is not in the catalog.
    pub unresolved: usize,
}

#[derive(Clone)]
pub struct Aggregator {
    repo: Arc<dyn Repository>,
    batch_size: usize,
}

impl Aggregator {
    pub fn new(repo: Arc<dyn Repository>, batch_size: usize) -> Self {
        Self {
            repo,
            batch_size: batch_size.max(1),
        }
    }

    /// Resolve rows to metric records.
    ///
    /// Later rows win over earlier rows with the same (entity, timestamp,
    /// period) key; output keeps the position of the first occurrence.
    pub fn normalize(rows: Vec<ProviderRow>, resolved: &ResolvedEntities, period: SyncInterval) -> Normalized {
        let mut positions: HashMap<MetricKey, usize> = HashMap::new();
        let mut normalized = Normalized::default();

        for row in rows {
            let Some(entity_id) = resolved.resolve(&row.identifier) else {
                normalized.unresolved += 1;
                continue;
            };

            let record = MetricRecord {
                entity_id,
                timestamp: row.timestamp,
                period,
                value: row.value,
            };

            match positions.get(&record.key()) {
                Some(&position) => normalized.records[position] = record,
                None => {
                    positions.insert(record.key(), normalized.records.len());
                    normalized.records.push(record);
                }
            }
        }

        normalized
    }

    /// Upsert records in batches of at most `batch_size`.
    ///
    /// A failed batch is logged and skipped; batches already written stay
    /// committed. Losing the connection aborts the remaining batches.
    pub async fn persist(&self, records: &[MetricRecord]) -> Result<usize, SyncError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut persisted = 0;

        for (i, batch) in records.chunks(self.batch_size).enumerate() {
            match self.repo.bulk_upsert(batch).await {
                Ok(affected) => {
                    tracing::info!(batch = i + 1, records = batch.len(), affected = affected, "Upserted metric records");
                    persisted += batch.len();
                }
                Err(e @ RepoError::Connection(_)) => {
                    tracing::error!(batch = i + 1, error = %e, "Lost database connection during upsert");
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::error!(batch = i + 1, records = batch.len(), error = %e, "Failed to upsert batch");
                }
            }
        }

        Ok(persisted)
    }

    /// Normalize then persist.
    pub async fn ingest(
        &self,
        rows: Vec<ProviderRow>,
        resolved: &ResolvedEntities,
        period: SyncInterval,
    ) -> Result<usize, SyncError> {
        let total = rows.len();
        let normalized = Self::normalize(rows, resolved, period);

        if normalized.unresolved > 0 {
            tracing::debug!(
                unresolved = normalized.unresolved,
                total = total,
                "Dropped rows without a catalog entity"
            );
        }

        self.persist(&normalized.records).await
    }
}
