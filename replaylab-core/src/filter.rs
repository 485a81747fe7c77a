//! Signal Filter: quality threshold, diversification caps, global cap.
//!
//! Stages run in a fixed order: minimum strength, per-(ticker, date) cap,
//! per-date cap, global cap. Input is ranked once up front with
//! `Signal::rank_cmp`; every later stage walks that order and only drops
//! entries, so each cap keeps the strongest survivors and the output order is
//! fully determined by the input set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::domain::Signal;
use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub min_strength: f64,
    pub max_per_ticker_date: usize,
    pub max_per_date: usize,
    pub max_total: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_strength: 50.0,
            max_per_ticker_date: 1,
            max_per_date: 5,
            max_total: 20,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FilterConfigError {
    #[error("min_strength must be within 0..=100, got {0}")]
    StrengthOutOfRange(f64),
    #[error("{0} must be at least 1")]
    ZeroCap(&'static str),
}

impl FilterConfig {
    pub fn validate(&self) -> Result<(), FilterConfigError> {
        if !(0.0..=100.0).contains(&self.min_strength) {
            return Err(FilterConfigError::StrengthOutOfRange(self.min_strength));
        }
        if self.max_per_ticker_date == 0 {
            return Err(FilterConfigError::ZeroCap("max_per_ticker_date"));
        }
        if self.max_per_date == 0 {
            return Err(FilterConfigError::ZeroCap("max_per_date"));
        }
        if self.max_total == 0 {
            return Err(FilterConfigError::ZeroCap("max_total"));
        }
        Ok(())
    }
}

/// Counts of what each stage removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStats {
    pub input: usize,
    pub below_min_strength: usize,
    pub ticker_date_capped: usize,
    pub date_capped: usize,
    pub total_capped: usize,
    pub output: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOutcome {
    pub signals: Vec<Signal>,
    pub stats: FilterStats,
}

#[derive(Debug, Clone)]
pub struct SignalFilter {
    config: FilterConfig,
}

impl SignalFilter {
    pub fn new(config: FilterConfig) -> Result<Self, FilterConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn apply(&self, mut signals: Vec<Signal>) -> FilterOutcome {
        let cfg = &self.config;
        let mut stats = FilterStats {
            input: signals.len(),
            ..FilterStats::default()
        };

        signals.sort_by(Signal::rank_cmp);

        // 1. Quality threshold. NaN strengths fail the comparison.
        let before = signals.len();
        signals.retain(|s| s.strength >= cfg.min_strength);
        stats.below_min_strength = before - signals.len();

        // 2. Per-(ticker, date) diversification.
        let mut per_ticker_date: BTreeMap<(String, NaiveDate), usize> = BTreeMap::new();
        let keep: Vec<bool> = signals
            .iter()
            .map(|s| {
                let n = per_ticker_date.entry((s.ticker.clone(), s.date)).or_insert(0);
                *n += 1;
                *n <= cfg.max_per_ticker_date
            })
            .collect();
        stats.ticker_date_capped = retain_marked(&mut signals, &keep);

        // 3. Per-date cap across tickers.
        let mut per_date: BTreeMap<NaiveDate, usize> = BTreeMap::new();
        let keep: Vec<bool> = signals
            .iter()
            .map(|s| {
                let n = per_date.entry(s.date).or_insert(0);
                *n += 1;
                *n <= cfg.max_per_date
            })
            .collect();
        stats.date_capped = retain_marked(&mut signals, &keep);

        // 4. Global cap.
        stats.total_capped = signals.len().saturating_sub(cfg.max_total);
        signals.truncate(cfg.max_total);

        stats.output = signals.len();
        FilterOutcome { signals, stats }
    }
}

fn retain_marked(signals: &mut Vec<Signal>, keep: &[bool]) -> usize {
    let before = signals.len();
    let mut flags = keep.iter();
    signals.retain(|_| flags.next().copied().unwrap_or(false));
    before - signals.len()
}
