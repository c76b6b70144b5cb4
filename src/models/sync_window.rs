//! Sync windows and interval aliases
//!
//! A `SyncWindow` is the `[from, to)` range plus aggregation period handed to
//! one task execution. It is computed on every tick and never persisted.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use std::fmt;

/// Aggregation periods a lane can be scheduled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SyncInterval {
    ThirtyMinutes,
    OneHour,
    FourHours,
    OneDay,
    OneWeek,
}

impl SyncInterval {
    pub const ALL: [SyncInterval; 5] = [
        SyncInterval::ThirtyMinutes,
        SyncInterval::OneHour,
        SyncInterval::FourHours,
        SyncInterval::OneDay,
        SyncInterval::OneWeek,
    ];

    /// Resolve an interval alias.
    ///
    /// Unknown aliases fall back to `OneDay`, the period every stream
    /// supports.
    pub fn from_alias(alias: &str) -> Self {
        match alias {
            "30m" => SyncInterval::ThirtyMinutes,
            "1h" => SyncInterval::OneHour,
            "4h" => SyncInterval::FourHours,
            "1d" => SyncInterval::OneDay,
            "1w" => SyncInterval::OneWeek,
            other => {
                tracing::warn!(alias = %other, "Unknown interval alias, defaulting to 1d");
                SyncInterval::OneDay
            }
        }
    }

    pub fn alias(&self) -> &'static str {
        match self {
            SyncInterval::ThirtyMinutes => "30m",
            SyncInterval::OneHour => "1h",
            SyncInterval::FourHours => "4h",
            SyncInterval::OneDay => "1d",
            SyncInterval::OneWeek => "1w",
        }
    }

    /// Length of one window of this period.
    pub fn step(&self) -> Duration {
        match self {
            SyncInterval::ThirtyMinutes => Duration::minutes(30),
            SyncInterval::OneHour => Duration::hours(1),
            SyncInterval::FourHours => Duration::hours(4),
            SyncInterval::OneDay => Duration::days(1),
            SyncInterval::OneWeek => Duration::weeks(1),
        }
    }

    /// How long records of this period are kept. `None` means forever.
    pub fn retention(&self) -> Option<Duration> {
        match self {
            SyncInterval::ThirtyMinutes => Some(Duration::days(1)),
            SyncInterval::OneHour => Some(Duration::days(2)),
            SyncInterval::FourHours => Some(Duration::days(7)),
            SyncInterval::OneDay | SyncInterval::OneWeek => None,
        }
    }

    /// How far back the first-run backfill of this period reaches.
    pub fn historical_horizon(&self) -> Duration {
        match self {
            SyncInterval::ThirtyMinutes => Duration::days(1),
            SyncInterval::OneHour => Duration::days(2),
            SyncInterval::FourHours => Duration::days(7),
            SyncInterval::OneDay | SyncInterval::OneWeek => Duration::days(730),
        }
    }

    /// Whether records of this period are evicted by age.
    pub fn is_intraday(&self) -> bool {
        self.retention().is_some()
    }

    pub fn tick_period(&self) -> std::time::Duration {
        self.step().to_std().unwrap_or(std::time::Duration::from_secs(86400))
    }
}

impl fmt::Display for SyncInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.alias())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncWindow {
    pub period: SyncInterval,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl SyncWindow {
    pub fn new(period: SyncInterval, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { period, from, to }
    }

    /// The last fully elapsed window of `interval` before `now`.
    ///
    /// `to` is aligned down to the interval grid (unix epoch based, UTC).
    pub fn current(interval: SyncInterval, now: DateTime<Utc>) -> Self {
        let step = interval.step().num_seconds();
        let ts = now.timestamp();
        let aligned = ts - ts.rem_euclid(step);
        let to = Utc.timestamp_opt(aligned, 0).single().unwrap_or(now);

        Self {
            period: interval,
            from: to - interval.step(),
            to,
        }
    }

    /// Full range covered by the first-run backfill of `interval`.
    pub fn historical(interval: SyncInterval, now: DateTime<Utc>) -> Self {
        Self {
            period: interval,
            from: now - interval.historical_horizon(),
            to: now,
        }
    }

    pub fn resolve(alias: &str, now: DateTime<Utc>) -> Self {
        Self::current(SyncInterval::from_alias(alias), now)
    }

    /// This window shifted back by the period's retention: the slice whose
    /// records age out on this tick.
    pub fn expired_slice(&self) -> Option<SyncWindow> {
        let retention = self.period.retention()?;
        Some(SyncWindow {
            period: self.period,
            from: self.from - retention,
            to: self.to - retention,
        })
    }

    pub fn duration(&self) -> Duration {
        self.to - self.from
    }
}

impl fmt::Display for SyncWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} -> {})",
            self.period,
            self.from.format("%Y-%m-%d %H:%M:%SZ"),
            self.to.format("%Y-%m-%d %H:%M:%SZ")
        )
    }
}
