//! Metrics Engine: pure functions from a trade set to performance statistics.
//!
//! Returns are per trade, as fractions of entry price. No function here looks
//! at bars, signals or the runner; the trade set is the only input.

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use replaylab_core::domain::{ExitReason, Trade};

use crate::stats::{one_sample_t_test, TTest};

/// Profit factor reported when there are winners and no losers.
pub const PROFIT_FACTOR_SENTINEL: f64 = 999.0;

/// Minimum number of trades before a significance test is run.
pub const DEFAULT_MIN_SIGNIFICANCE_SAMPLE: usize = 30;

/// Below this, the return series is treated as having no dispersion.
const MIN_STD: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Per-trade risk-free return, as a fraction, subtracted before Sharpe.
    pub risk_free_rate: f64,
    pub min_significance_sample: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.0,
            min_significance_sample: DEFAULT_MIN_SIGNIFICANCE_SAMPLE,
        }
    }
}

/// Whether the mean per-trade return was tested against zero.
///
/// Only `Tested` carries a p-value. Consumers must not read
/// `InsufficientSample` as either a pass or a fail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Significance {
    InsufficientSample { sample_size: usize, required: usize },
    Tested(TTest),
    /// Enough trades, but every return was identical.
    Undefined,
}

impl Significance {
    pub fn p_value(&self) -> Option<f64> {
        match self {
            Self::Tested(t) => Some(t.p_one_sided),
            _ => None,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, Self::InsufficientSample { .. })
    }
}

/// Aggregate statistics for one slice of a trade set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub label: String,
    pub trades: usize,
    pub win_rate: f64,
    pub avg_return_pct: f64,
    pub total_return_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub trades: usize,
    /// Number of returns the statistics were computed from.
    pub sample_size: usize,
    pub wins: usize,
    pub losses: usize,
    /// Fraction of trades with positive PnL.
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win_pct: f64,
    pub avg_loss_pct: f64,
    /// Mean per-trade return in percent.
    pub expectancy_pct: f64,
    /// Sum of per-trade fractional returns.
    pub total_return: f64,
    /// Largest peak-to-trough fall of the equity curve, as a negative fraction.
    pub max_drawdown: f64,
    /// Per-trade (not annualized). `None` when undefined.
    pub sharpe: Option<f64>,
    pub significance: Significance,
    pub by_exit_reason: Vec<Breakdown>,
    pub by_entry_hour: Vec<Breakdown>,
}

impl RunMetrics {
    pub fn compute(trades: &[Trade], config: &MetricsConfig) -> Self {
        let returns: Vec<f64> = trades.iter().map(Trade::return_fraction).collect();
        let pcts: Vec<f64> = trades.iter().map(|t| t.pnl_percent).collect();
        let wins: Vec<f64> = pcts.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = pcts.iter().copied().filter(|p| *p < 0.0).collect();

        Self {
            trades: trades.len(),
            sample_size: returns.len(),
            wins: wins.len(),
            losses: losses.len(),
            win_rate: win_rate(trades),
            profit_factor: profit_factor(&pcts),
            avg_win_pct: mean_f64(&wins),
            avg_loss_pct: mean_f64(&losses),
            expectancy_pct: mean_f64(&pcts),
            total_return: returns.iter().sum(),
            max_drawdown: max_drawdown(&equity_curve(trades)),
            sharpe: sharpe_ratio(&returns, config.risk_free_rate),
            significance: significance(&returns, config.min_significance_sample),
            by_exit_reason: by_exit_reason(trades),
            by_entry_hour: by_entry_hour(trades),
        }
    }

    /// Metrics of an empty trade set.
    pub fn empty(config: &MetricsConfig) -> Self {
        Self::compute(&[], config)
    }
}

// ─── Individual metric functions ────────────────────────────────────

pub fn win_rate(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().filter(|t| t.is_winner()).count() as f64 / trades.len() as f64
}

/// Gross profit / |gross loss| over per-trade percent returns.
///
/// No losses and some profit gives `PROFIT_FACTOR_SENTINEL`, so rankings stay
/// totally ordered; no trades or no profit gives 0.
pub fn profit_factor(pnl_percents: &[f64]) -> f64 {
    let gross_profit: f64 = pnl_percents.iter().filter(|p| **p > 0.0).sum();
    let gross_loss: f64 = pnl_percents.iter().filter(|p| **p < 0.0).map(|p| p.abs()).sum();

    if gross_loss < 1e-10 {
        return if gross_profit > 0.0 {
            PROFIT_FACTOR_SENTINEL
        } else {
            0.0
        };
    }
    (gross_profit / gross_loss).min(PROFIT_FACTOR_SENTINEL)
}

/// Mean excess return over its sample standard deviation.
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let excess: Vec<f64> = returns.iter().map(|r| r - risk_free_rate).collect();
    let std = std_dev(&excess);
    if !std.is_finite() || std < MIN_STD {
        return None;
    }
    Some(mean_f64(&excess) / std)
}

pub fn significance(returns: &[f64], min_sample: usize) -> Significance {
    if returns.len() < min_sample.max(2) {
        return Significance::InsufficientSample {
            sample_size: returns.len(),
            required: min_sample.max(2),
        };
    }
    match one_sample_t_test(returns) {
        Some(test) => Significance::Tested(test),
        None => Significance::Undefined,
    }
}

/// Trades in the order they were opened: date, entry time, then ticker.
pub fn chronological(trades: &[Trade]) -> Vec<&Trade> {
    let mut ordered: Vec<&Trade> = trades.iter().collect();
    ordered.sort_by(|a, b| {
        (a.date, a.entry_time, &a.ticker, &a.policy).cmp(&(b.date, b.entry_time, &b.ticker, &b.policy))
    });
    ordered
}

/// Equity starting at 1.0, adding each trade's fractional return in order.
pub fn equity_curve(trades: &[Trade]) -> Vec<f64> {
    let mut curve = Vec::with_capacity(trades.len() + 1);
    let mut equity = 1.0;
    curve.push(equity);
    for trade in chronological(trades) {
        equity += trade.return_fraction();
        curve.push(equity);
    }
    curve
}

/// Maximum drawdown as a negative fraction (e.g., -0.15 = 15% drawdown).
///
/// Returns 0.0 if equity is constant or monotonically increasing.
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    if equity_curve.len() < 2 {
        return 0.0;
    }
    let mut peak = equity_curve[0];
    let mut max_dd = 0.0_f64;

    for &eq in equity_curve {
        if eq > peak {
            peak = eq;
        }
        if peak > 0.0 {
            let dd = (eq - peak) / peak;
            if dd < max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

// ─── Breakdowns ─────────────────────────────────────────────────────

pub fn by_exit_reason(trades: &[Trade]) -> Vec<Breakdown> {
    let mut groups: BTreeMap<ExitReason, Vec<&Trade>> = BTreeMap::new();
    for t in trades {
        groups.entry(t.exit_reason).or_default().push(t);
    }
    groups
        .into_iter()
        .map(|(reason, group)| breakdown(reason.to_string(), &group))
        .collect()
}

/// Entry-time bucket label used in the hour breakdown.
pub fn entry_hour_bucket(time: NaiveTime) -> &'static str {
    let minutes = time.hour() * 60 + time.minute();
    match minutes {
        m if m < 9 * 60 + 30 => "pre-09:30",
        m if m < 10 * 60 => "09:30-10:00",
        m if m < 11 * 60 => "10:00-11:00",
        m if m < 12 * 60 => "11:00-12:00",
        m if m < 13 * 60 => "12:00-13:00",
        _ => "13:00+",
    }
}

pub fn by_entry_hour(trades: &[Trade]) -> Vec<Breakdown> {
    // Labels sort chronologically except the pre-open bucket.
    let mut groups: BTreeMap<(u8, &'static str), Vec<&Trade>> = BTreeMap::new();
    for t in trades {
        let label = entry_hour_bucket(t.entry_time);
        let order = if label == "pre-09:30" { 0 } else { 1 };
        groups.entry((order, label)).or_default().push(t);
    }
    groups
        .into_iter()
        .map(|((_, label), group)| breakdown(label.to_string(), &group))
        .collect()
}

fn breakdown(label: String, trades: &[&Trade]) -> Breakdown {
    let pcts: Vec<f64> = trades.iter().map(|t| t.pnl_percent).collect();
    let winners = trades.iter().filter(|t| t.is_winner()).count();
    Breakdown {
        label,
        trades: trades.len(),
        win_rate: if trades.is_empty() {
            0.0
        } else {
            winners as f64 / trades.len() as f64
        },
        avg_return_pct: mean_f64(&pcts),
        total_return_pct: pcts.iter().sum(),
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

pub(crate) fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
