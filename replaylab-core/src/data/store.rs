//! Bar Store Adapter contract and structured error types.
//!
//! The `BarStore` trait abstracts over where bars live (in memory, Parquet on
//! disk, a synthetic generator) so the engine can swap sources and mock them in
//! tests. Implementations are read-only and must tolerate concurrent readers:
//! the worker pool calls `get_bars` from many threads at once.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::Bar;

/// Bar interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
}

impl Timeframe {
    /// Bar length in minutes.
    pub fn minutes(self) -> i64 {
        match self {
            Self::OneMinute => 1,
            Self::FiveMinutes => 5,
            Self::FifteenMinutes => 15,
            Self::ThirtyMinutes => 30,
            Self::OneHour => 60,
            Self::OneDay => 390,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::minutes(self.minutes())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::OneDay => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" | "1min" => Ok(Self::OneMinute),
            "5m" | "5min" => Ok(Self::FiveMinutes),
            "15m" | "15min" => Ok(Self::FifteenMinutes),
            "30m" | "30min" => Ok(Self::ThirtyMinutes),
            "1h" | "60m" => Ok(Self::OneHour),
            "1d" | "day" => Ok(Self::OneDay),
            other => Err(StoreError::InvalidTimeframe(other.to_string())),
        }
    }
}

/// Structured error types for bar store operations.
///
/// An empty result is not an error: `get_bars` returns `Ok(vec![])` when a
/// ticker-day has no data, and the runner records that unit as data
/// unavailable. `Unavailable` means the store as a whole cannot serve reads and
/// aborts the run.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bar store '{store}' is unavailable: {reason}")]
    Unavailable { store: String, reason: String },

    #[error("invalid timeframe '{0}'")]
    InvalidTimeframe(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("corrupt data for {ticker} on {date}: {reason}")]
    Corrupt {
        ticker: String,
        date: NaiveDate,
        reason: String,
    },
}

impl StoreError {
    /// Whether this error takes the whole store down rather than one read.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// How many calendar days `prior_close` walks back looking for a session.
pub const PRIOR_SESSION_LOOKBACK_DAYS: i64 = 7;

/// Read-only access to stored bars.
pub trait BarStore: Send + Sync {
    /// Human-readable name of this store.
    fn name(&self) -> &str;

    /// Bars for one ticker on one date, ascending by timestamp.
    ///
    /// Never returns bars from any other date and never fills gaps.
    fn get_bars(
        &self,
        ticker: &str,
        date: NaiveDate,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, StoreError>;

    /// Close of the most recent session strictly before `date`.
    ///
    /// Walks back day by day up to `PRIOR_SESSION_LOOKBACK_DAYS`.
    fn prior_close(
        &self,
        ticker: &str,
        date: NaiveDate,
        timeframe: Timeframe,
    ) -> Result<Option<f64>, StoreError> {
        for back in 1..=PRIOR_SESSION_LOOKBACK_DAYS {
            let day = date - Duration::days(back);
            let bars = self.get_bars(ticker, day, timeframe)?;
            if let Some(last) = bars.last() {
                return Ok(Some(last.close));
            }
        }
        Ok(None)
    }

    /// Check whether the store can currently serve reads.
    fn is_available(&self) -> bool {
        true
    }
}
