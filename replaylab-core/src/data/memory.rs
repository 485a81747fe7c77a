//! In-memory bar store.
//!
//! Holds one contiguous, timestamp-ordered series per (ticker, timeframe).
//! Days are cut out of the series on read, so consecutive sessions sit next to
//! each other in storage exactly as they would in a real database table.

use chrono::NaiveDate;
use std::collections::HashMap;

use super::store::{BarStore, StoreError, Timeframe};
use crate::domain::Bar;

#[derive(Debug, Default)]
pub struct MemoryBarStore {
    series: HashMap<(String, Timeframe), Vec<Bar>>,
    offline: bool,
}

impl MemoryBarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bars for a ticker. The series is re-sorted and de-duplicated by
    /// timestamp (first occurrence wins).
    pub fn insert(&mut self, ticker: &str, timeframe: Timeframe, bars: Vec<Bar>) {
        let series = self
            .series
            .entry((ticker.to_string(), timeframe))
            .or_default();
        series.extend(bars);
        series.sort_by_key(|b| b.timestamp);
        series.dedup_by_key(|b| b.timestamp);
    }

    /// Builder form of `insert`.
    pub fn with_bars(mut self, ticker: &str, timeframe: Timeframe, bars: Vec<Bar>) -> Self {
        self.insert(ticker, timeframe, bars);
        self
    }

    /// Simulate a total outage: every read fails with `StoreError::Unavailable`.
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    pub fn tickers(&self) -> Vec<String> {
        let mut out: Vec<String> = self.series.keys().map(|(t, _)| t.clone()).collect();
        out.sort();
        out.dedup();
        out
    }
}

impl BarStore for MemoryBarStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn get_bars(
        &self,
        ticker: &str,
        date: NaiveDate,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, StoreError> {
        if self.offline {
            return Err(StoreError::Unavailable {
                store: self.name().to_string(),
                reason: "store marked offline".into(),
            });
        }
        let Some(series) = self.series.get(&(ticker.to_string(), timeframe)) else {
            return Ok(Vec::new());
        };
        let start = series.partition_point(|b| b.date() < date);
        let end = series.partition_point(|b| b.date() <= date);
        Ok(series[start..end].to_vec())
    }

    fn is_available(&self) -> bool {
        !self.offline
    }
}
