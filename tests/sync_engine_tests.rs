mod common;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{
    chain, evm_address, ticker, token, FakeAggregate, FakeRegistry, FakeSupply, FakeTickers, FakeTransfers,
    InMemoryRepository,
};
use metrics_syncer::error::{ProviderError, RepoError, SyncError};
use metrics_syncer::jobs::address_sync::AddressSyncTask;
use metrics_syncer::jobs::coin_market_sync::{CoinMarketSyncTask, MarketSyncReport};
use metrics_syncer::jobs::scheduler::{Scheduler, SyncTask};
use metrics_syncer::models::{EntityGroup, MetricRecord, ProviderRow, SupplyCandidate, SyncInterval, SyncWindow};
use metrics_syncer::providers::bitquery::BitqueryNetwork;
use metrics_syncer::services::aggregator::{Aggregator, DEFAULT_BATCH_SIZE};
use metrics_syncer::services::backfill::BackfillController;
use metrics_syncer::services::chunked_fetcher::ChunkedFetcher;
use metrics_syncer::services::entity_resolver::EntityResolver;
use metrics_syncer::services::supply_resolver::SupplyResolver;

fn record(entity_id: i32, hour: u32, value: Decimal) -> MetricRecord {
    MetricRecord {
        entity_id,
        timestamp: Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap(),
        period: SyncInterval::ThirtyMinutes,
        value,
    }
}

// ---- Chunked fetcher ----

#[tokio::test(start_paused = true)]
async fn test_pinned_chunk_first_and_delay_per_chunk() {
    let tokens: Vec<_> = (1..=45)
        .map(|i| metrics_syncer::models::TokenRef::new(evm_address(i)))
        .collect();
    let source = FakeTransfers::new(2);
    let window = SyncWindow::current(SyncInterval::OneDay, Utc::now());

    let started = tokio::time::Instant::now();
    let rows = ChunkedFetcher::new(20, Duration::from_secs(4))
        .with_pinned(evm_address(7))
        .fetch_transfer_counts(&source, &window, &tokens)
        .await
        .unwrap();

    // 44 remaining tokens in chunks of 20, plus the pinned singleton
    assert_eq!(source.chunk_count(), 4);
    let calls = source.calls.lock();
    assert_eq!(calls[0].1, vec![evm_address(7)]);
    assert_eq!(calls.len(), 8);
    drop(calls);

    assert_eq!(rows.len(), 45);
    assert!(rows.iter().all(|r| r.timestamp == window.to));
    assert_eq!(started.elapsed(), Duration::from_secs(16));
}

// ---- Aggregator ----

#[tokio::test]
async fn test_upsert_twice_keeps_second_value() {
    let repo = Arc::new(InMemoryRepository::default());
    let aggregator = Aggregator::new(repo.clone(), DEFAULT_BATCH_SIZE);

    aggregator.persist(&[record(1, 0, dec!(10))]).await.unwrap();
    aggregator.persist(&[record(1, 0, dec!(25))]).await.unwrap();

    let stored = repo.stored();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].value, dec!(25));
}

#[tokio::test]
async fn test_empty_input_skips_repository() {
    let repo = Arc::new(InMemoryRepository::default());
    let aggregator = Aggregator::new(repo.clone(), DEFAULT_BATCH_SIZE);

    assert_eq!(aggregator.persist(&[]).await.unwrap(), 0);
    assert!(repo.upsert_calls.lock().is_empty());
}

#[tokio::test]
async fn test_query_error_skips_only_that_batch() {
    let repo = Arc::new(InMemoryRepository::default());
    repo.upsert_failures
        .lock()
        .extend([None, Some(RepoError::Query("deadlock detected".into()))]);
    let aggregator = Aggregator::new(repo.clone(), 2);

    let records: Vec<_> = (0..5).map(|h| record(1, h, dec!(1))).collect();
    let persisted = aggregator.persist(&records).await.unwrap();

    assert_eq!(*repo.upsert_calls.lock(), vec![2, 2, 1]);
    assert_eq!(persisted, 3);
    assert_eq!(repo.record_count(), 3);
}

#[tokio::test]
async fn test_connection_error_aborts_remaining_batches() {
    let repo = Arc::new(InMemoryRepository::default());
    repo.upsert_failures
        .lock()
        .extend([None, Some(RepoError::Connection("connection reset".into()))]);
    let aggregator = Aggregator::new(repo.clone(), 2);

    let records: Vec<_> = (0..5).map(|h| record(1, h, dec!(1))).collect();
    let err = aggregator.persist(&records).await.unwrap_err();

    assert!(matches!(err, SyncError::Repository(RepoError::Connection(_))));
    assert_eq!(repo.upsert_calls.lock().len(), 2);
    assert_eq!(repo.record_count(), 2);
}

#[tokio::test]
async fn test_unresolved_rows_never_persisted() {
    let repo = Arc::new(InMemoryRepository::with_catalog(vec![
        chain(1, "ethereum"),
        token(2, "erc20", "0x00000000000000000000000000000000000000AA", Some(18)),
    ]));
    let resolved = EntityResolver::build(repo.as_ref(), &["ethereum", "erc20"], true, false)
        .await
        .unwrap();
    let aggregator = Aggregator::new(repo.clone(), DEFAULT_BATCH_SIZE);

    let ts = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    let rows = vec![
        ProviderRow::new("ethereum", ts, dec!(100)),
        ProviderRow::new("0x00000000000000000000000000000000000000aa", ts, dec!(7)),
        ProviderRow::new("0x00000000000000000000000000000000000000bb", ts, dec!(9)),
        ProviderRow::new("dogecoin", ts, dec!(3)),
    ];

    let persisted = aggregator
        .ingest(rows, &resolved, SyncInterval::OneDay)
        .await
        .unwrap();

    assert_eq!(persisted, 2);
    let mut ids: Vec<_> = repo.stored().iter().map(|r| r.entity_id).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn test_resolver_failure_propagates() {
    let repo = Arc::new(InMemoryRepository::default());
    *repo.catalog_failure.lock() = Some(RepoError::Query("relation \"platforms\" does not exist".into()));

    let err = EntityResolver::build(repo.as_ref(), &["erc20"], true, false)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Resolver(_)));
}

// ---- Backfill ----

#[tokio::test]
async fn test_backfill_writes_one_point_per_window() {
    let repo = Arc::new(InMemoryRepository::with_catalog(vec![chain(1, "bitcoin")]));
    let resolved = EntityResolver::build(repo.as_ref(), &["bitcoin"], true, false)
        .await
        .unwrap();
    let aggregator = Aggregator::new(repo.clone(), DEFAULT_BATCH_SIZE);

    let now = Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap();
    let day = ChronoDuration::days(1);

    let report = BackfillController::new(day)
        .run(now - day * 3, now, |window| {
            let rows = vec![ProviderRow::new("bitcoin", window.to, dec!(42))];
            let aggregator = aggregator.clone();
            let resolved = resolved.clone();
            async move { aggregator.ingest(rows, &resolved, window.period).await }
        })
        .await;

    assert_eq!(report.windows, 3);
    assert_eq!(report.records, 3);

    let mut timestamps: Vec<_> = repo.stored().iter().map(|r| r.timestamp).collect();
    timestamps.sort();
    assert_eq!(timestamps, vec![now - day * 2, now - day, now]);
}

// ---- Address sync ----

fn bsc_and_solana_catalog() -> Vec<metrics_syncer::models::CatalogEntry> {
    let mut catalog: Vec<_> = (1..=40)
        .map(|i| token(i as i32, "bep20", &evm_address(i), Some(18)))
        .collect();
    catalog.push(token(100, "solana", "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", Some(6)));
    catalog.push(token(101, "solana", "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB", Some(6)));
    catalog
}

#[tokio::test(start_paused = true)]
async fn test_chunk_failure_discards_whole_window() {
    let repo = Arc::new(InMemoryRepository::with_catalog(bsc_and_solana_catalog()));
    let bsc = Arc::new(FakeTransfers::new(3).failing_on(1));
    let solana = Arc::new(FakeTransfers::new(3));

    let task = AddressSyncTask::new(repo.clone(), Aggregator::new(repo.clone(), DEFAULT_BATCH_SIZE))
        .with_transfers(BitqueryNetwork::Bsc, bsc.clone())
        .with_transfers(BitqueryNetwork::Solana, solana.clone())
        .with_pinned(evm_address(1))
        .with_chunk_delay(Duration::from_secs(4));

    let window = SyncWindow::current(SyncInterval::ThirtyMinutes, Utc::now());
    let started = tokio::time::Instant::now();

    task.incremental(&window).await.unwrap();

    // pinned chunk, then the failing chunk; the third is never requested
    assert_eq!(bsc.chunk_count(), 2);
    assert_eq!(bsc.calls.lock()[0].1, vec![evm_address(1)]);

    // nothing from the bsc window, solana still synced
    assert!(repo.stored().iter().all(|r| r.entity_id >= 100));
    let solana_points = repo.stored_with(SyncInterval::ThirtyMinutes);
    assert_eq!(solana_points.len(), 2);
    assert!(solana_points.iter().all(|r| r.value == dec!(5) && r.timestamp == window.to));

    // the rate-limit pause follows every chunk, failed ones included
    assert_eq!(started.elapsed(), Duration::from_secs(12));
}

#[tokio::test(start_paused = true)]
async fn test_pinned_only_applies_to_bsc() {
    let repo = Arc::new(InMemoryRepository::with_catalog(bsc_and_solana_catalog()));
    let solana = Arc::new(FakeTransfers::new(1));

    let task = AddressSyncTask::new(repo.clone(), Aggregator::new(repo.clone(), DEFAULT_BATCH_SIZE))
        .with_transfers(BitqueryNetwork::Solana, solana.clone())
        .with_pinned(evm_address(1))
        .with_chunk_delay(Duration::ZERO);

    let window = SyncWindow::current(SyncInterval::ThirtyMinutes, Utc::now());
    task.incremental(&window).await.unwrap();

    assert_eq!(solana.chunk_count(), 1);
    assert_eq!(solana.calls.lock()[0].1.len(), 2);
}

#[tokio::test]
async fn test_warehouse_failure_does_not_stop_other_steps() {
    let repo = Arc::new(InMemoryRepository::with_catalog(vec![
        chain(1, "ethereum"),
        chain(2, "bitcoin"),
        chain(3, "litecoin"),
    ]));
    let window = SyncWindow::current(SyncInterval::ThirtyMinutes, Utc::now());
    let btc_rows = vec![
        ProviderRow::new("bitcoin", window.to, dec!(900000)),
        ProviderRow::new("litecoin", window.to, dec!(250000)),
    ];

    let task = AddressSyncTask::new(repo.clone(), Aggregator::new(repo.clone(), DEFAULT_BATCH_SIZE))
        .with_warehouse(Arc::new(FakeAggregate::failing()), Arc::new(FakeAggregate::new(btc_rows)));

    task.incremental(&window).await.unwrap();

    assert_eq!(repo.stored_with(SyncInterval::ThirtyMinutes).len(), 2);
    assert!(repo.stored_for(1).is_empty());
}

#[tokio::test]
async fn test_thirty_minute_tick_evicts_expired_slice() {
    let repo = Arc::new(InMemoryRepository::with_catalog(vec![chain(1, "ethereum")]));
    let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 10, 0).unwrap();
    let window = SyncWindow::current(SyncInterval::ThirtyMinutes, now);
    let day = ChronoDuration::days(1);

    repo.seed(&[
        MetricRecord { entity_id: 1, timestamp: window.from - day, period: SyncInterval::ThirtyMinutes, value: dec!(1) },
        MetricRecord { entity_id: 1, timestamp: window.to, period: SyncInterval::ThirtyMinutes, value: dec!(1) },
        MetricRecord { entity_id: 1, timestamp: window.to - day, period: SyncInterval::OneDay, value: dec!(1) },
    ]);

    let task = AddressSyncTask::new(repo.clone(), Aggregator::new(repo.clone(), DEFAULT_BATCH_SIZE));
    task.incremental(&window).await.unwrap();

    let deletions = repo.deletions.lock().clone();
    assert_eq!(deletions, vec![(window.from - day, window.to - day)]);
    assert_eq!(repo.stored_with(SyncInterval::ThirtyMinutes).len(), 1);

    // the surviving point is folded into its day before the eviction
    let day_start = Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap();
    assert_eq!(repo.rollups.lock().clone(), vec![(day_start, day_start + day, SyncInterval::OneDay)]);
    let daily: Vec<_> = repo
        .stored_with(SyncInterval::OneDay)
        .iter()
        .map(|r| (r.timestamp, r.value))
        .collect();
    assert_eq!(daily, vec![(window.to - day, dec!(1)), (day_start, dec!(1))]);
}

#[tokio::test]
async fn test_daily_tick_sweeps_old_intraday_points() {
    let repo = Arc::new(InMemoryRepository::with_catalog(vec![chain(1, "ethereum")]));
    let now = Utc.with_ymd_and_hms(2024, 5, 10, 0, 5, 0).unwrap();
    let window = SyncWindow::current(SyncInterval::OneDay, now);

    repo.seed(&[
        MetricRecord { entity_id: 1, timestamp: window.to - ChronoDuration::days(3), period: SyncInterval::ThirtyMinutes, value: dec!(1) },
        MetricRecord { entity_id: 1, timestamp: window.to - ChronoDuration::hours(2), period: SyncInterval::ThirtyMinutes, value: dec!(1) },
        MetricRecord { entity_id: 1, timestamp: window.to - ChronoDuration::days(3), period: SyncInterval::OneDay, value: dec!(1) },
    ]);

    let task = AddressSyncTask::new(repo.clone(), Aggregator::new(repo.clone(), DEFAULT_BATCH_SIZE));
    task.incremental(&window).await.unwrap();

    // the closed day gets its total, the three-day-old intraday point is gone
    assert_eq!(repo.record_count(), 3);
    assert!(repo
        .stored()
        .iter()
        .all(|r| r.period == SyncInterval::OneDay || r.timestamp > window.to - ChronoDuration::days(1)));
    let closed_day: Vec<_> = repo
        .stored_with(SyncInterval::OneDay)
        .into_iter()
        .filter(|r| r.timestamp == window.from)
        .collect();
    assert_eq!(closed_day.len(), 1);
    assert_eq!(closed_day[0].value, dec!(1));
}

#[tokio::test]
async fn test_intraday_points_roll_up_into_daily_totals() {
    let repo = Arc::new(InMemoryRepository::with_catalog(vec![token(1, "bep20", &evm_address(1), Some(18))]));
    // 5 unique accounts per window
    let bsc = Arc::new(FakeTransfers::new(3));

    let task = AddressSyncTask::new(repo.clone(), Aggregator::new(repo.clone(), DEFAULT_BATCH_SIZE))
        .with_transfers(BitqueryNetwork::Bsc, bsc)
        .with_chunk_delay(Duration::ZERO);

    let day_one = Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap();
    let day = ChronoDuration::days(1);
    let half_hour = ChronoDuration::minutes(30);

    // two full days of 30m ticks, then the daily tick closing the second day
    for tick in 1..=96 {
        let window = SyncWindow::current(SyncInterval::ThirtyMinutes, day_one + half_hour * tick);
        task.incremental(&window).await.unwrap();
    }
    task.incremental(&SyncWindow::current(SyncInterval::OneDay, day_one + day * 2))
        .await
        .unwrap();

    // points are stamped at window end: day one holds 00:30..23:30, day two
    // 00:00..23:30, and the last window's stamp opens day three
    let daily: Vec<_> = repo
        .stored_with(SyncInterval::OneDay)
        .iter()
        .map(|r| (r.timestamp, r.value))
        .collect();
    assert_eq!(
        daily,
        vec![(day_one, dec!(235)), (day_one + day, dec!(240)), (day_one + day * 2, dec!(5))]
    );

    // day one's intraday points aged out, its total stays
    let intraday = repo.stored_with(SyncInterval::ThirtyMinutes);
    assert_eq!(intraday.len(), 49);
    assert!(intraday.iter().all(|r| r.timestamp >= day_one + day));
}

#[tokio::test]
async fn test_catalog_failure_aborts_tick() {
    let repo = Arc::new(InMemoryRepository::default());
    *repo.catalog_failure.lock() = Some(RepoError::Query("permission denied".into()));

    let task = AddressSyncTask::new(repo.clone(), Aggregator::new(repo.clone(), DEFAULT_BATCH_SIZE))
        .with_warehouse(Arc::new(FakeAggregate::new(Vec::new())), Arc::new(FakeAggregate::new(Vec::new())));

    let window = SyncWindow::current(SyncInterval::ThirtyMinutes, Utc::now());
    let err = task.incremental(&window).await.unwrap_err();
    assert!(matches!(err, SyncError::Resolver(_)));
}

// ---- Circulating supply ----

fn candidate(entity_id: i32, coin_uid: &str, chain_uid: &str, reference: Decimal) -> SupplyCandidate {
    SupplyCandidate {
        entity_id,
        coin_uid: coin_uid.to_string(),
        chain_uid: Some(chain_uid.to_string()),
        entity_type: "erc20".to_string(),
        address: Some(format!("0x{:040x}", entity_id)),
        decimals: Some(18),
        reference_supply: Some(reference),
        multi_chain: true,
    }
}

#[tokio::test]
async fn test_supply_clamped_to_reference() {
    let repo = Arc::new(InMemoryRepository::default());
    let c = candidate(1, "some-token", "ethereum", dec!(1000));
    let explorer = FakeSupply::default().with(c.address.as_deref().unwrap(), "1500000000000000000000", None);

    let resolver = SupplyResolver::new(repo.clone(), Arc::new(FakeRegistry::default()))
        .with_explorer("ethereum", Arc::new(explorer));

    assert_eq!(resolver.resolve(&c, &HashMap::new()).await, Some(dec!(1000)));
}

#[tokio::test(start_paused = true)]
async fn test_supply_sync_writes_hints() {
    let repo = Arc::new(InMemoryRepository::default());

    let on_chain = candidate(1, "some-token", "ethereum", dec!(1000));
    let stablecoin = candidate(2, "tether", "tron", dec!(90000));
    let unknown_chain = candidate(3, "other-token", "kava", dec!(500));
    let mut single_chain = candidate(4, "solo", "ethereum", dec!(77));
    single_chain.multi_chain = false;
    let bep2 = candidate(5, "wrapped-thing", "binancecoin", dec!(12));

    *repo.candidates.lock() = vec![on_chain.clone(), stablecoin, unknown_chain, single_chain, bep2];

    let explorer = FakeSupply::default().with(on_chain.address.as_deref().unwrap(), "400000000000000000000", None);
    let mut registry = FakeRegistry::default();
    registry
        .supplies
        .insert("tether".to_string(), HashMap::from([("tron".to_string(), dec!(60000))]));

    let resolver = SupplyResolver::new(repo.clone(), Arc::new(registry))
        .with_explorer("ethereum", Arc::new(explorer))
        .with_delay(Duration::from_millis(100));

    let report = resolver.sync(None).await.unwrap();

    let hints = repo.hints.lock().clone();
    assert_eq!(hints.get(&1), Some(&dec!(400)));
    assert_eq!(hints.get(&2), Some(&dec!(60000)));
    assert_eq!(hints.get(&3), None);
    assert_eq!(hints.get(&4), Some(&dec!(77)));
    assert_eq!(hints.get(&5), Some(&dec!(12)));
    assert_eq!(report.updated, 4);
    assert_eq!(report.unresolved, 1);
}

#[tokio::test]
async fn test_ledger_decimals_take_precedence() {
    let repo = Arc::new(InMemoryRepository::default());
    let mut c = candidate(1, "some-token", "tron", dec!(1000000));
    c.decimals = Some(18);
    let tron = FakeSupply::default().with(c.address.as_deref().unwrap(), "250000000", Some(6));

    let resolver = SupplyResolver::new(repo, Arc::new(FakeRegistry::default())).with_tron(Arc::new(tron));

    assert_eq!(resolver.resolve(&c, &HashMap::new()).await, Some(dec!(250)));
}

#[tokio::test]
async fn test_stepn_on_spl_uses_reference() {
    let repo = Arc::new(InMemoryRepository::default());
    let mut c = candidate(1, "stepn", "solana", dec!(600000000));
    c.entity_type = "spl".to_string();
    let solana = Arc::new(FakeSupply::default());

    let resolver = SupplyResolver::new(repo, Arc::new(FakeRegistry::default())).with_solana(solana.clone());

    assert_eq!(resolver.resolve(&c, &HashMap::new()).await, Some(dec!(600000000)));
    assert!(solana.calls.lock().is_empty());
}

// ---- Scheduler ----

/// Task whose executions take `busy_for` and which tracks overlap.
struct SlowTask {
    busy_for: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    groups: Vec<EntityGroup>,
    historical_runs: Mutex<Vec<&'static str>>,
    fail: bool,
}

impl SlowTask {
    fn new(busy_for: Duration) -> Self {
        Self {
            busy_for,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            groups: Vec::new(),
            historical_runs: Mutex::new(Vec::new()),
            fail: false,
        }
    }
}

#[async_trait]
impl SyncTask for SlowTask {
    fn name(&self) -> &str {
        "slow"
    }

    fn backfill_groups(&self) -> Vec<EntityGroup> {
        self.groups.clone()
    }

    async fn historical(&self, group: &EntityGroup) -> Result<(), SyncError> {
        self.historical_runs.lock().push(group.name);
        Ok(())
    }

    async fn incremental(&self, _window: &SyncWindow) -> Result<(), SyncError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        tokio::time::sleep(self.busy_for).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(ProviderError::RateLimited { provider: "fake" }.into());
        }
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_skips_ticks_while_busy() {
    let repo = Arc::new(InMemoryRepository::default());
    let task = Arc::new(SlowTask::new(Duration::from_secs(70 * 60)));

    let mut scheduler = Scheduler::new(repo.clone());
    scheduler.register("slow_30m", SyncInterval::ThirtyMinutes, task.clone());
    let handle = scheduler.start();

    // First run covers 0..70m, dropping the 30m and 60m ticks; the second
    // starts at 90m.
    tokio::time::sleep(Duration::from_secs(100 * 60)).await;

    let stats = handle.stats("slow_30m").unwrap();
    assert_eq!(stats.runs, 1);
    assert_eq!(stats.skipped, 2);
    assert_eq!(task.in_flight.load(Ordering::SeqCst), 1);

    // The second run finishes at 160m; the overdue tick it finds stands for
    // the dropped 120m and 150m ticks, and the next one is due at 180m.
    tokio::time::sleep(Duration::from_secs(70 * 60)).await;

    let stats = handle.stats("slow_30m").unwrap();
    assert_eq!(stats.runs, 2);
    assert_eq!(stats.skipped, 4);
    assert_eq!(task.in_flight.load(Ordering::SeqCst), 0);

    handle.shutdown();
    let stats = handle.wait().await["slow_30m"];
    assert_eq!(stats.runs, 2);
    assert_eq!(stats.skipped, 4);

    // Nothing started after shutdown and executions never overlapped
    assert_eq!(task.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(repo.task_runs.lock().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_runs_tick_reached_on_completion() {
    let repo = Arc::new(InMemoryRepository::default());
    let task = Arc::new(SlowTask::new(Duration::from_secs(30 * 60)));

    let mut scheduler = Scheduler::new(repo.clone());
    scheduler.register("exact_30m", SyncInterval::ThirtyMinutes, task.clone());
    let handle = scheduler.start();

    // Runs end exactly on the 30m, 60m and 90m ticks, each of which still runs
    tokio::time::sleep(Duration::from_secs(95 * 60)).await;

    let stats = handle.stats("exact_30m").unwrap();
    assert_eq!(stats.runs, 3);
    assert_eq!(stats.skipped, 0);
    assert_eq!(task.in_flight.load(Ordering::SeqCst), 1);

    handle.shutdown();
    let stats = handle.wait().await["exact_30m"];
    assert_eq!(stats.runs, 4);
    assert_eq!(stats.skipped, 0);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_backfills_only_empty_groups() {
    let repo = Arc::new(InMemoryRepository::with_catalog(vec![
        token(1, "erc20", "0x00000000000000000000000000000000000000aa", Some(18)),
        token(2, "bep20", "0x00000000000000000000000000000000000000bb", Some(18)),
    ]));
    repo.seed(&[record(1, 0, dec!(1))]);

    let mut task = SlowTask::new(Duration::ZERO);
    task.groups = vec![EntityGroup::new("eth", &["erc20"]), EntityGroup::new("bsc", &["bep20"])];
    let task = Arc::new(task);

    let mut scheduler = Scheduler::new(repo.clone());
    scheduler
        .register("slow_30m", SyncInterval::ThirtyMinutes, task.clone())
        .register("slow_1d", SyncInterval::OneDay, task.clone());
    let handle = scheduler.start();

    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.shutdown();

    let stats = handle.wait().await;
    let runs_30m = stats["slow_30m"].runs;
    let runs_1d = stats["slow_1d"].runs;

    // Shared task is backfilled once, then both lanes tick immediately
    assert_eq!(*task.historical_runs.lock(), vec!["bsc"]);
    assert_eq!(runs_30m, 1);
    assert_eq!(runs_1d, 1);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_records_failures_and_keeps_going() {
    let repo = Arc::new(InMemoryRepository::default());
    let mut task = SlowTask::new(Duration::ZERO);
    task.fail = true;

    let mut scheduler = Scheduler::new(repo.clone());
    scheduler.register("failing_30m", SyncInterval::ThirtyMinutes, Arc::new(task));
    let handle = scheduler.start();

    // Ticks at 0, 30m and 60m
    tokio::time::sleep(Duration::from_secs(61 * 60)).await;
    handle.shutdown();

    let stats = handle.wait().await["failing_30m"];

    assert_eq!(stats.runs, 3);
    assert_eq!(stats.failures, 3);
    assert_eq!(stats.skipped, 0);

    let runs = repo.task_runs.lock();
    assert_eq!(runs.len(), 3);
    assert!(runs.iter().all(|(lane, error)| lane == "failing_30m" && error.is_some()));
}

// ---- Coin market sync ----

fn market_task(repo: &Arc<InMemoryRepository>, source: &Arc<FakeTickers>) -> CoinMarketSyncTask {
    CoinMarketSyncTask::new(repo.clone(), source.clone())
}

fn gateway_error(status: u16) -> ProviderError {
    ProviderError::Status {
        provider: "coingecko",
        status,
        body: String::new(),
    }
}

/// Offset of every request from `started`, in request order.
fn request_offsets(source: &FakeTickers, started: tokio::time::Instant) -> Vec<Duration> {
    source.calls.lock().iter().map(|(_, at)| at.duration_since(started)).collect()
}

#[tokio::test(start_paused = true)]
async fn test_market_sync_replaces_tickers_with_pacing() {
    let repo = Arc::new(InMemoryRepository::with_market_coins(&[
        ("bitcoin", 1, "bitcoin"),
        ("ethereum", 2, "ethereum"),
    ]));
    repo.markets.lock().insert(1, vec![ticker("BTC", "USD", "Stale")]);
    let source = Arc::new(
        FakeTickers::default()
            .with("bitcoin", vec![ticker("BTC", "USDT", "Binance"), ticker("BTC", "EUR", "Kraken")])
            .with("ethereum", vec![ticker("ETH", "USDT", "Binance")]),
    );

    let started = tokio::time::Instant::now();
    let report = market_task(&repo, &source).sync(None).await.unwrap();

    assert_eq!(
        report,
        MarketSyncReport {
            coins: 2,
            synced: 2,
            failed: 0,
            delisted: 0,
        }
    );
    let bitcoin = repo.markets_for(1);
    assert_eq!(bitcoin.len(), 2);
    assert!(bitcoin.iter().all(|t| t.market_name != "Stale"));
    assert_eq!(repo.markets_for(2)[0].market_uid, "binance");

    assert_eq!(request_offsets(&source, started), vec![Duration::ZERO, Duration::from_secs(3)]);
    assert_eq!(started.elapsed(), Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_market_sync_backs_off_on_rate_limit_and_gateway_errors() {
    let repo = Arc::new(InMemoryRepository::with_market_coins(&[
        ("bitcoin", 1, "bitcoin"),
        ("ethereum", 2, "ethereum"),
        ("tether", 3, "tether"),
    ]));
    repo.markets.lock().insert(1, vec![ticker("BTC", "USD", "Kept")]);
    let source = Arc::new(
        FakeTickers::default()
            .failing("bitcoin", ProviderError::RateLimited { provider: "coingecko" })
            .failing("ethereum", gateway_error(503))
            .with("tether", vec![ticker("USDT", "USD", "Kraken")]),
    );

    let started = tokio::time::Instant::now();
    let report = market_task(&repo, &source).sync(None).await.unwrap();

    assert_eq!(report.synced, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(
        request_offsets(&source, started),
        vec![Duration::ZERO, Duration::from_secs(60), Duration::from_secs(90)]
    );
    // A failed fetch leaves the stored tickers alone
    assert_eq!(repo.markets_for(1)[0].market_name, "Kept");
    assert!(repo.markets_for(2).is_empty());
    assert_eq!(repo.markets_for(3).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_market_sync_clears_id_of_unknown_coin() {
    let repo = Arc::new(InMemoryRepository::with_market_coins(&[
        ("gone", 1, "gone-coin"),
        ("bitcoin", 2, "bitcoin"),
    ]));
    let source = Arc::new(
        FakeTickers::default()
            .failing("gone-coin", gateway_error(404))
            .with("bitcoin", vec![ticker("BTC", "USDT", "Binance")]),
    );
    let task = market_task(&repo, &source);

    let started = tokio::time::Instant::now();
    let report = task.sync(None).await.unwrap();

    assert_eq!(report.delisted, 1);
    assert_eq!(report.synced, 1);
    assert_eq!(report.failed, 0);
    // No pause after a 404
    assert_eq!(request_offsets(&source, started), vec![Duration::ZERO, Duration::ZERO]);

    task.sync(None).await.unwrap();
    assert_eq!(source.requested(), vec!["gone-coin", "bitcoin", "bitcoin"]);
}

#[tokio::test(start_paused = true)]
async fn test_market_sync_aborts_on_connection_error() {
    let repo = Arc::new(InMemoryRepository::with_market_coins(&[
        ("bitcoin", 1, "bitcoin"),
        ("ethereum", 2, "ethereum"),
    ]));
    *repo.market_failure.lock() = Some(RepoError::Connection("refused".into()));
    let source = Arc::new(FakeTickers::default().with("bitcoin", vec![ticker("BTC", "USDT", "Binance")]));

    let err = market_task(&repo, &source).sync(None).await.unwrap_err();

    assert!(!err.is_recoverable());
    assert_eq!(source.requested(), vec!["bitcoin"]);
}

#[tokio::test(start_paused = true)]
async fn test_market_sync_for_one_coin() {
    let repo = Arc::new(InMemoryRepository::with_market_coins(&[
        ("bitcoin", 1, "bitcoin"),
        ("ethereum", 2, "ethereum"),
    ]));
    let source = Arc::new(FakeTickers::default().with("ethereum", vec![ticker("ETH", "USDT", "Binance")]));

    let report = market_task(&repo, &source)
        .with_request_delay(Duration::ZERO)
        .sync(Some("ethereum"))
        .await
        .unwrap();

    assert_eq!(report.coins, 1);
    assert_eq!(source.requested(), vec!["ethereum"]);
    assert_eq!(repo.markets_for(2).len(), 1);
}
