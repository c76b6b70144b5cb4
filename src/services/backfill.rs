//! Historical backfill
//!
//! Walks backward from `now` in fixed windows until the horizon is reached,
//! running the fetch-and-aggregate pipeline once per window, newest first.

use chrono::{DateTime, Duration, Utc};
use std::future::Future;

use crate::error::SyncError;
use crate::models::{SyncInterval, SyncWindow};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub windows: usize,
    pub failed: usize,
    pub records: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct BackfillController {
    window: Duration,
    period: SyncInterval,
}

impl BackfillController {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            period: SyncInterval::OneDay,
        }
    }

    /// Period stamped on the windows handed to the pipeline.
    pub fn with_period(mut self, period: SyncInterval) -> Self {
        self.period = period;
        self
    }

    /// Run `pipeline` over `[to - window, to)` for `to = now, now - window, ...`
    /// and stop after the first window whose start reaches `horizon`.
    ///
    /// Windows run one at a time. A failed window is logged and the walk goes
    /// on; running again from the same horizon is safe since upserts are
    /// idempotent.
    pub async fn run<F, Fut>(&self, horizon: DateTime<Utc>, now: DateTime<Utc>, mut pipeline: F) -> BackfillReport
    where
        F: FnMut(SyncWindow) -> Fut,
        Fut: Future<Output = Result<usize, SyncError>>,
    {
        let mut report = BackfillReport::default();

        if self.window <= Duration::zero() {
            tracing::warn!(window = %self.window, "Backfill window must be positive, nothing to do");
            return report;
        }

        let mut to = now;

        loop {
            let from = to - self.window;
            let window = SyncWindow::new(self.period, from, to);

            report.windows += 1;

            match pipeline(window).await {
                Ok(records) => {
                    tracing::debug!(window = %window, records = records, "Backfilled window");
                    report.records += records;
                }
                Err(e) => {
                    tracing::error!(window = %window, error = %e, "Backfill window failed");
                    report.failed += 1;
                }
            }

            if from <= horizon {
                break;
            }
            to = from;
        }

        tracing::info!(
            windows = report.windows,
            failed = report.failed,
            records = report.records,
            "Backfill finished"
        );

        report
    }
}
