//! Trade: a realized round trip produced by one exit policy for one signal.

use super::bar::Bar;
use super::signal::Direction;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    /// Time-based close: wall-clock cutoff or max bars held.
    TimeExit,
    /// No rule fired; closed at the last bar of the session.
    EndOfDay,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
            Self::TrailingStop => "trailing_stop",
            Self::TimeExit => "time_exit",
            Self::EndOfDay => "end_of_day",
        };
        f.write_str(s)
    }
}

/// A complete intraday round trip: entry → exit.
///
/// Prices are per share; `pnl` is per share and `pnl_percent` is percent of
/// entry price (1.5 means +1.5%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub ticker: String,
    pub date: NaiveDate,
    pub direction: Direction,
    /// Name of the exit policy that realized this trade.
    pub policy: String,

    // ── Signal traceability ──
    pub signal_time: NaiveTime,
    pub signal_strength: f64,

    // ── Entry ──
    pub entry_bar: usize,
    pub entry_time: NaiveTime,
    pub entry_price: f64,

    // ── Exit ──
    pub exit_bar: usize,
    pub exit_time: NaiveTime,
    pub exit_price: f64,
    pub exit_reason: ExitReason,

    // ── Excursion ──
    pub highest_price: f64,
    pub lowest_price: f64,

    // ── PnL ──
    pub pnl: f64,
    pub pnl_percent: f64,
    pub bars_held: usize,
}

impl Trade {
    /// Per-trade return as a fraction of entry price.
    pub fn return_fraction(&self) -> f64 {
        self.pnl_percent / 100.0
    }

    pub fn is_winner(&self) -> bool {
        self.pnl > 0.0
    }

    /// Per-share PnL and percent return for a position closed at `exit_price`.
    pub fn pnl_for(direction: Direction, entry_price: f64, exit_price: f64) -> (f64, f64) {
        let pnl = (exit_price - entry_price) * direction.sign();
        let pct = if entry_price > 0.0 {
            pnl / entry_price * 100.0
        } else {
            0.0
        };
        (pnl, pct)
    }

    /// Fill-realism checks against the bar the entry was filled on.
    ///
    /// Returns one message per violated rule; an empty vector means the trade
    /// is internally consistent.
    pub fn validate(&self, entry_bar: &Bar) -> Vec<String> {
        let mut errors = Vec::new();

        if entry_bar.time_of_day() != self.entry_time {
            errors.push(format!(
                "entry time {} does not match entry bar {}",
                self.entry_time,
                entry_bar.time_of_day()
            ));
        }
        if !entry_bar.contains_price(self.entry_price) {
            errors.push(format!(
                "entry price {:.4} outside entry bar range {:.4}..{:.4}",
                self.entry_price, entry_bar.low, entry_bar.high
            ));
        }
        if self.entry_time <= self.signal_time {
            errors.push(format!(
                "entry {} is not after signal {}",
                self.entry_time, self.signal_time
            ));
        }
        if self.exit_time < self.entry_time {
            errors.push(format!(
                "exit {} precedes entry {}",
                self.exit_time, self.entry_time
            ));
        }
        if self.lowest_price > self.entry_price || self.highest_price < self.entry_price {
            errors.push(format!(
                "entry price {:.4} outside excursion {:.4}..{:.4}",
                self.entry_price, self.lowest_price, self.highest_price
            ));
        }
        if self.exit_price < self.lowest_price || self.exit_price > self.highest_price {
            errors.push(format!(
                "exit price {:.4} outside excursion {:.4}..{:.4}",
                self.exit_price, self.lowest_price, self.highest_price
            ));
        }

        errors
    }
}
