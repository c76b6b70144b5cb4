//! Scheduler
//!
//! Drives registered `SyncTask`s. Every distinct task first gets its one-time
//! historical backfill for groups with no data yet, then one lane per
//! registration ticks on the interval grid. A lane runs one execution at a
//! time; ticks that fire while it is busy are dropped and counted.

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::SyncError;
use crate::models::{EntityGroup, SyncInterval, SyncWindow};
use crate::services::repository::Repository;

/// One metric stream.
#[async_trait]
pub trait SyncTask: Send + Sync {
    fn name(&self) -> &str;

    /// Groups backfilled on start when they have no data yet.
    fn backfill_groups(&self) -> Vec<EntityGroup> {
        Vec::new()
    }

    async fn historical(&self, _group: &EntityGroup) -> Result<(), SyncError> {
        Ok(())
    }

    async fn incremental(&self, window: &SyncWindow) -> Result<(), SyncError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneStats {
    /// Completed executions, failed ones included.
    pub runs: u64,
    /// Ticks dropped because an execution was still running.
    pub skipped: u64,
    pub failures: u64,
}

type SharedStats = Arc<Mutex<HashMap<String, LaneStats>>>;

#[derive(Clone)]
struct Lane {
    name: String,
    interval: SyncInterval,
    task: Arc<dyn SyncTask>,
}

pub struct Scheduler {
    repo: Arc<dyn Repository>,
    lanes: Vec<Lane>,
}

impl Scheduler {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            lanes: Vec::new(),
        }
    }

    /// Add a lane running `task` every `interval`. One task may back several
    /// lanes; it is backfilled once.
    pub fn register(&mut self, name: impl Into<String>, interval: SyncInterval, task: Arc<dyn SyncTask>) -> &mut Self {
        self.lanes.push(Lane {
            name: name.into(),
            interval,
            task,
        });
        self
    }

    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats: SharedStats = Arc::new(Mutex::new(
            self.lanes
                .iter()
                .map(|lane| (lane.name.clone(), LaneStats::default()))
                .collect(),
        ));

        // Lanes grouped by the task instance they drive, in registration order
        let mut groups: Vec<(Arc<dyn SyncTask>, Vec<Lane>)> = Vec::new();
        for lane in self.lanes {
            match groups.iter_mut().find(|(task, _)| Arc::ptr_eq(task, &lane.task)) {
                Some((_, lanes)) => lanes.push(lane),
                None => groups.push((lane.task.clone(), vec![lane])),
            }
        }

        let handles = groups
            .into_iter()
            .map(|(task, lanes)| {
                let repo = self.repo.clone();
                let stats = stats.clone();
                let shutdown = shutdown_rx.clone();

                tokio::spawn(async move {
                    backfill_missing(repo.as_ref(), task.as_ref(), &shutdown).await;

                    let lanes = lanes
                        .into_iter()
                        .map(|lane| run_lane(lane, repo.clone(), stats.clone(), shutdown.clone()));
                    join_all(lanes).await;
                })
            })
            .collect();

        tracing::info!("Scheduler started");

        SchedulerHandle {
            shutdown: shutdown_tx,
            stats,
            handles,
        }
    }
}

pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    stats: SharedStats,
    handles: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn stats(&self, lane: &str) -> Option<LaneStats> {
        self.stats.lock().get(lane).copied()
    }

    /// Stop every lane once its current execution, if any, returns.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Join every lane and return their final stats.
    pub async fn wait(self) -> HashMap<String, LaneStats> {
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Scheduler lane panicked");
            }
        }
        tracing::info!("Scheduler stopped");

        self.stats.lock().clone()
    }
}

async fn backfill_missing(repo: &dyn Repository, task: &dyn SyncTask, shutdown: &watch::Receiver<bool>) {
    for group in task.backfill_groups() {
        if *shutdown.borrow() {
            return;
        }

        match repo.exists_for_entity_group(&group.types).await {
            Ok(true) => {
                tracing::debug!(task = task.name(), group = group.name, "Group has data, skipping backfill");
            }
            Ok(false) => {
                tracing::info!(task = task.name(), group = group.name, "No data for group, running historical sync");
                if let Err(e) = task.historical(&group).await {
                    tracing::error!(task = task.name(), group = group.name, error = %e, "Historical sync failed");
                }
            }
            Err(e) => {
                tracing::error!(task = task.name(), group = group.name, error = %e, "Failed to check existing data");
            }
        }
    }
}

/// Grid ticks covered by a stale `scheduled` instant observed at `now`.
///
/// With `MissedTickBehavior::Skip` an overdue `tick()` yields once with the
/// first missed deadline and reschedules after `now`, so every grid point in
/// `[scheduled, now]` was lost.
fn missed_ticks(scheduled: Instant, now: Instant, period: Duration) -> u64 {
    if period.is_zero() {
        return 1;
    }
    (now.saturating_duration_since(scheduled).as_nanos() / period.as_nanos()) as u64 + 1
}

async fn run_lane(lane: Lane, repo: Arc<dyn Repository>, stats: SharedStats, mut shutdown: watch::Receiver<bool>) {
    let period = lane.interval.tick_period();
    // Taken before the interval starts so the immediate first tick runs
    let mut idle_since = Instant::now();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(lane = %lane.name, interval = %lane.interval, "Lane started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let scheduled = tokio::select! {
            at = ticker.tick() => at,
            _ = shutdown.changed() => break,
        };

        // Deadline passed while the previous execution was running
        if scheduled < idle_since {
            let skipped = missed_ticks(scheduled, Instant::now(), period);
            tracing::warn!(lane = %lane.name, skipped = skipped, "Lane busy, skipped ticks");
            if let Some(entry) = stats.lock().get_mut(&lane.name) {
                entry.skipped += skipped;
            }
            continue;
        }

        execute(&lane, repo.as_ref(), &stats).await;
        idle_since = Instant::now();
    }

    tracing::info!(lane = %lane.name, "Lane stopped");
}

async fn execute(lane: &Lane, repo: &dyn Repository, stats: &SharedStats) {
    let span = tracing::info_span!("sync_run", lane = %lane.name, run_id = %Uuid::new_v4());

    async {
        let window = SyncWindow::current(lane.interval, Utc::now());
        tracing::info!(window = %window, "Starting sync");

        let result = lane.task.incremental(&window).await;

        let error = match &result {
            Ok(()) => {
                tracing::info!(window = %window, "Sync complete");
                None
            }
            Err(e) => {
                tracing::error!(window = %window, error = %e, "Sync failed");
                Some(e.to_string())
            }
        };

        if let Some(entry) = stats.lock().get_mut(&lane.name) {
            entry.runs += 1;
            if error.is_some() {
                entry.failures += 1;
            }
        }

        if let Err(e) = repo.record_task_run(&lane.name, &window, error.as_deref()).await {
            tracing::warn!(error = %e, "Failed to record sync status");
        }
    }
    .instrument(span)
    .await
}
