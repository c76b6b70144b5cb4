//! Persistence contract of the sync engine and its Postgres implementation.
//!
//! The engine never holds a transaction open across a provider call: every
//! method here is invoked only after the network fetch it depends on has
//! completed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    FromQueryResult, QueryFilter, Set, Statement, TransactionTrait,
};

use crate::entities::{address_stats, coin_markets, coins, platforms, prelude::*, sync_status};
use crate::error::RepoError;
use crate::models::{
    CatalogEntry, MarketCoin, MarketTicker, MetricRecord, SupplyCandidate, SyncInterval, SyncWindow,
};

/// Rows per INSERT statement; 5 bind parameters per row keeps a statement
/// under the Postgres limit of 65535 parameters.
const MAX_ROWS_PER_STATEMENT: usize = 8_000;

#[async_trait]
pub trait Repository: Send + Sync {
    /// Whether any metric record exists for a platform of the given types.
    async fn exists_for_entity_group(&self, types: &[&str]) -> Result<bool, RepoError>;

    /// Insert or overwrite records keyed by (entity, date, period).
    ///
    /// One call is one transaction. Returns the number of affected rows.
    async fn bulk_upsert(&self, records: &[MetricRecord]) -> Result<u64, RepoError>;

    /// Sum intraday records with `from <= date < to` into one `into` record
    /// per entity and `into` bucket, overwriting any existing one.
    ///
    /// Callers pass whole `into` buckets whose intraday points are all still
    /// stored, so a rerun recomputes the same totals.
    async fn rollup_points(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        into: SyncInterval,
    ) -> Result<u64, RepoError>;

    /// Delete intraday records with `from <= date < to`.
    async fn delete_expired(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<u64, RepoError>;

    /// Overwrite the circulating-supply hint of one platform.
    async fn update_hint(&self, entity_id: i32, value: Decimal) -> Result<(), RepoError>;

    async fn query_catalog(
        &self,
        types: &[&str],
        with_decimals: bool,
        with_address: bool,
    ) -> Result<Vec<CatalogEntry>, RepoError>;

    /// Platforms with a known reference supply, optionally limited to coin uids.
    async fn query_supply_candidates(
        &self,
        uids: Option<&[String]>,
    ) -> Result<Vec<SupplyCandidate>, RepoError>;

    /// Coins carrying a ticker source id, optionally a single uid.
    async fn query_market_coins(&self, uid: Option<&str>) -> Result<Vec<MarketCoin>, RepoError>;

    /// Replace every ticker of a coin in one transaction.
    async fn replace_coin_markets(&self, coin_id: i32, tickers: &[MarketTicker]) -> Result<u64, RepoError>;

    /// Forget the ticker source id of a coin the source no longer knows.
    async fn clear_coingecko_id(&self, coin_id: i32) -> Result<(), RepoError>;

    /// Persist the outcome of one lane execution.
    async fn record_task_run(
        &self,
        _lane: &str,
        _window: &SyncWindow,
        _error: Option<&str>,
    ) -> Result<(), RepoError> {
        Ok(())
    }
}

/// `Repository` backed by SeaORM on Postgres.
#[derive(Clone)]
pub struct SeaOrmRepository {
    db: DatabaseConnection,
}

impl SeaOrmRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[derive(Debug, FromQueryResult)]
struct SupplyRow {
    id: i32,
    uid: String,
    chain_uid: Option<String>,
    platform_type: String,
    address: Option<String>,
    decimals: Option<i32>,
    reference_supply: Option<Decimal>,
    multi_chain: bool,
}

const SUPPLY_CANDIDATES_SELECT: &str = r#"
    SELECT
        p.id,
        c.uid,
        p.chain_uid,
        p.type AS platform_type,
        p.address,
        p.decimals,
        c.circulating_supply AS reference_supply,
        (SELECT COUNT(*) FROM platforms mp WHERE mp.coin_id = p.coin_id) > 1 AS multi_chain
    FROM platforms p
    JOIN coins c ON c.id = p.coin_id
    WHERE c.circulating_supply IS NOT NULL
"#;

fn supply_candidates_sql(filtered: bool) -> String {
    let uid_filter = if filtered { "  AND c.uid = ANY($1)\n" } else { "" };
    format!("{}{}    ORDER BY p.id", SUPPLY_CANDIDATES_SELECT, uid_filter)
}

fn intraday_aliases() -> Vec<&'static str> {
    SyncInterval::ALL
        .iter()
        .filter(|i| i.is_intraday())
        .map(|i| i.alias())
        .collect()
}

/// Intraday periods strictly finer than `into`.
fn rollup_sources(into: SyncInterval) -> Vec<&'static str> {
    SyncInterval::ALL
        .iter()
        .filter(|i| i.is_intraday() && i.step() < into.step())
        .map(|i| i.alias())
        .collect()
}

/// Buckets follow the epoch grid of `SyncWindow::current`. Aliases come from
/// `SyncInterval` only, never from input.
fn rollup_sql(into: SyncInterval) -> Option<String> {
    let sources = rollup_sources(into);
    if sources.is_empty() {
        return None;
    }

    let periods = sources
        .iter()
        .map(|alias| format!("'{}'", alias))
        .collect::<Vec<_>>()
        .join(", ");
    let step = into.step().num_seconds();

    Some(format!(
        r#"
        INSERT INTO address_stats (platform_id, date, period, count)
        SELECT
            platform_id,
            to_timestamp(floor(extract(epoch FROM date) / {step}) * {step}) AS bucket,
            $3,
            SUM(count)
        FROM address_stats
        WHERE period IN ({periods})
          AND date >= $1
          AND date < $2
        GROUP BY platform_id, bucket
        ON CONFLICT (platform_id, date, period) DO UPDATE SET count = EXCLUDED.count
        "#
    ))
}

#[async_trait]
impl Repository for SeaOrmRepository {
    async fn exists_for_entity_group(&self, types: &[&str]) -> Result<bool, RepoError> {
        let found = AddressStats::find()
            .inner_join(Platforms)
            .filter(platforms::Column::Type.is_in(types.iter().copied()))
            .one(&self.db)
            .await?;

        Ok(found.is_some())
    }

    async fn bulk_upsert(&self, records: &[MetricRecord]) -> Result<u64, RepoError> {
        if records.is_empty() {
            return Ok(0);
        }

        let txn = self.db.begin().await?;
        let mut affected = 0;

        for rows in records.chunks(MAX_ROWS_PER_STATEMENT) {
            let models = rows.iter().map(|record| address_stats::ActiveModel {
                platform_id: Set(record.entity_id),
                date: Set(record.timestamp.fixed_offset()),
                period: Set(record.period.alias().to_string()),
                count: Set(record.value),
                ..Default::default()
            });

            affected += AddressStats::insert_many(models)
                .on_conflict(
                    OnConflict::columns([
                        address_stats::Column::PlatformId,
                        address_stats::Column::Date,
                        address_stats::Column::Period,
                    ])
                    .update_columns([
                        address_stats::Column::Count,
                        address_stats::Column::Date,
                        address_stats::Column::PlatformId,
                    ])
                    .to_owned(),
                )
                .exec_without_returning(&txn)
                .await?;
        }

        txn.commit().await?;

        Ok(affected)
    }

    async fn rollup_points(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        into: SyncInterval,
    ) -> Result<u64, RepoError> {
        let Some(sql) = rollup_sql(into) else {
            return Ok(0);
        };

        let result = self
            .db
            .execute(Statement::from_sql_and_values(
                self.db.get_database_backend(),
                sql,
                [from.into(), to.into(), into.alias().into()],
            ))
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<u64, RepoError> {
        let result = AddressStats::delete_many()
            .filter(address_stats::Column::Period.is_in(intraday_aliases()))
            .filter(address_stats::Column::Date.gte(from.fixed_offset()))
            .filter(address_stats::Column::Date.lt(to.fixed_offset()))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }

    async fn update_hint(&self, entity_id: i32, value: Decimal) -> Result<(), RepoError> {
        Platforms::update_many()
            .col_expr(platforms::Column::CirculatingSupply, Expr::value(value))
            .filter(platforms::Column::Id.eq(entity_id))
            .exec(&self.db)
            .await?;

        Ok(())
    }

    async fn query_catalog(
        &self,
        types: &[&str],
        with_decimals: bool,
        with_address: bool,
    ) -> Result<Vec<CatalogEntry>, RepoError> {
        let mut query = Platforms::find().filter(platforms::Column::Type.is_in(types.iter().copied()));

        if with_address {
            query = query.filter(platforms::Column::Address.is_not_null());
        }

        let rows = query.all(&self.db).await?;

        Ok(rows
            .into_iter()
            .map(|row| CatalogEntry {
                id: row.id,
                entity_type: row.r#type,
                address: row.address,
                decimals: if with_decimals {
                    row.decimals.and_then(|d| u32::try_from(d).ok())
                } else {
                    None
                },
            })
            .collect())
    }

    async fn query_supply_candidates(
        &self,
        uids: Option<&[String]>,
    ) -> Result<Vec<SupplyCandidate>, RepoError> {
        let backend = self.db.get_database_backend();
        let statement = match uids {
            Some(uids) => Statement::from_sql_and_values(
                backend,
                supply_candidates_sql(true),
                [uids.to_vec().into()],
            ),
            None => Statement::from_string(backend, supply_candidates_sql(false)),
        };

        let rows = SupplyRow::find_by_statement(statement).all(&self.db).await?;

        Ok(rows
            .into_iter()
            .map(|row| SupplyCandidate {
                entity_id: row.id,
                coin_uid: row.uid,
                chain_uid: row.chain_uid,
                entity_type: row.platform_type,
                address: row.address,
                decimals: row.decimals.and_then(|d| u32::try_from(d).ok()),
                reference_supply: row.reference_supply,
                multi_chain: row.multi_chain,
            })
            .collect())
    }

    async fn query_market_coins(&self, uid: Option<&str>) -> Result<Vec<MarketCoin>, RepoError> {
        let mut query = Coins::find().filter(coins::Column::CoingeckoId.is_not_null());

        if let Some(uid) = uid {
            query = query.filter(coins::Column::Uid.eq(uid));
        }

        let rows = query.all(&self.db).await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                row.coingecko_id.map(|coingecko_id| MarketCoin {
                    id: row.id,
                    coingecko_id,
                })
            })
            .collect())
    }

    async fn replace_coin_markets(&self, coin_id: i32, tickers: &[MarketTicker]) -> Result<u64, RepoError> {
        let txn = self.db.begin().await?;

        CoinMarkets::delete_many()
            .filter(coin_markets::Column::CoinId.eq(coin_id))
            .exec(&txn)
            .await?;

        let mut inserted = 0;
        for rows in tickers.chunks(MAX_ROWS_PER_STATEMENT / 2) {
            let models = rows.iter().map(|ticker| coin_markets::ActiveModel {
                coin_id: Set(coin_id),
                base: Set(ticker.base.clone()),
                target: Set(ticker.target.clone()),
                price: Set(ticker.price),
                volume: Set(ticker.volume),
                volume_usd: Set(ticker.volume_usd),
                market_uid: Set(ticker.market_uid.clone()),
                market_name: Set(ticker.market_name.clone()),
                ..Default::default()
            });

            inserted += CoinMarkets::insert_many(models).exec_without_returning(&txn).await?;
        }

        txn.commit().await?;

        Ok(inserted)
    }

    async fn clear_coingecko_id(&self, coin_id: i32) -> Result<(), RepoError> {
        Coins::update_many()
            .col_expr(coins::Column::CoingeckoId, Expr::value(Option::<String>::None))
            .filter(coins::Column::Id.eq(coin_id))
            .exec(&self.db)
            .await?;

        Ok(())
    }

    async fn record_task_run(
        &self,
        lane: &str,
        window: &SyncWindow,
        error: Option<&str>,
    ) -> Result<(), RepoError> {
        let now = Utc::now().fixed_offset();

        let existing = SyncStatus::find()
            .filter(sync_status::Column::Lane.eq(lane))
            .one(&self.db)
            .await?;

        match existing {
            Some(record) => {
                let success_count = record.success_count;
                let error_count = record.error_count;
                let mut active_model: sync_status::ActiveModel = record.into();
                active_model.last_attempt_at = Set(Some(now));
                active_model.last_window_to = Set(Some(window.to.fixed_offset()));
                active_model.last_error = Set(error.map(str::to_string));
                match error {
                    None => {
                        active_model.last_success_at = Set(Some(now));
                        active_model.success_count = Set(success_count + 1);
                    }
                    Some(_) => {
                        active_model.error_count = Set(error_count + 1);
                    }
                }
                active_model.update(&self.db).await?;
            }
            None => {
                let new_record = sync_status::ActiveModel {
                    lane: Set(lane.to_string()),
                    last_success_at: Set(error.is_none().then_some(now)),
                    last_attempt_at: Set(Some(now)),
                    last_window_to: Set(Some(window.to.fixed_offset())),
                    last_error: Set(error.map(str::to_string)),
                    success_count: Set(i64::from(error.is_none())),
                    error_count: Set(i64::from(error.is_some())),
                    ..Default::default()
                };
                new_record.insert(&self.db).await?;
            }
        }

        tracing::debug!(lane = %lane, failed = error.is_some(), "Recorded lane run");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intraday_aliases_exclude_daily() {
        let aliases = intraday_aliases();
        assert!(aliases.contains(&"30m"));
        assert!(aliases.contains(&"4h"));
        assert!(!aliases.contains(&"1d"));
        assert!(!aliases.contains(&"1w"));
    }

    #[test]
    fn test_rollup_sources_are_finer_intraday_periods() {
        assert_eq!(rollup_sources(SyncInterval::OneDay), vec!["30m", "1h", "4h"]);
        assert_eq!(rollup_sources(SyncInterval::OneHour), vec!["30m"]);
        assert!(rollup_sources(SyncInterval::ThirtyMinutes).is_empty());
    }

    #[test]
    fn test_rollup_sql_buckets_on_target_grid() {
        let sql = rollup_sql(SyncInterval::OneDay).unwrap();
        assert!(sql.contains("/ 86400) * 86400"));
        assert!(sql.contains("period IN ('30m', '1h', '4h')"));
        assert!(sql.contains("DO UPDATE SET count = EXCLUDED.count"));
        assert!(rollup_sql(SyncInterval::ThirtyMinutes).is_none());
    }

    #[test]
    fn test_supply_candidates_filter_in_sql() {
        let filtered = supply_candidates_sql(true);
        assert!(filtered.contains("c.uid = ANY($1)"));
        assert!(filtered.trim_end().ends_with("ORDER BY p.id"));
        assert!(!supply_candidates_sql(false).contains("$1"));
    }

    #[test]
    fn test_statement_size_fits_bind_limit() {
        assert!(MAX_ROWS_PER_STATEMENT * 5 < 65_535);
        // coin_markets rows bind 8 values
        assert!(MAX_ROWS_PER_STATEMENT / 2 * 8 < 65_535);
    }
}
