//! Rule-based exit policy: stop-loss, take-profit, trailing stop, time exit.
//!
//! Rules are checked in that fixed order on every bar and the first one that
//! triggers wins, so a bar that touches both the stop and the target closes at
//! the stop. A level breached at the open fills at the open (gap-through),
//! otherwise at the level itself.
//!
//! Percentages are in percent units: `stop_loss_pct = 1.0` means 1%.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use super::{Entry, ExitDecision, ExitPolicy, PolicyError, PositionTracker};
use crate::domain::{Bar, Direction, ExitReason};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitRules {
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub trailing_stop_pct: Option<f64>,
    /// Close at the close of the bar this many bars after entry.
    pub max_bars_held: Option<usize>,
    /// Close at the open of the first bar starting at or after this time.
    pub close_at: Option<NaiveTime>,
}

impl ExitRules {
    /// `take_profit_pct`/`stop_loss_pct` shorthand used by most configs.
    pub fn bracket(take_profit_pct: f64, stop_loss_pct: f64) -> Self {
        Self {
            stop_loss_pct: Some(stop_loss_pct),
            take_profit_pct: Some(take_profit_pct),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let pcts = [
            ("stop_loss_pct", self.stop_loss_pct, 100.0),
            ("take_profit_pct", self.take_profit_pct, f64::MAX),
            ("trailing_stop_pct", self.trailing_stop_pct, 100.0),
        ];
        for (field, value, upper) in pcts {
            if let Some(v) = value {
                if !(v.is_finite() && v > 0.0 && v < upper) {
                    return Err(format!("{field} must be a positive percentage, got {v}"));
                }
            }
        }
        if self.max_bars_held == Some(0) {
            return Err("max_bars_held must be >= 1".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RulePolicy {
    name: String,
    rules: ExitRules,
}

impl RulePolicy {
    pub fn new(name: impl Into<String>, rules: ExitRules) -> Result<Self, PolicyError> {
        let name = name.into();
        rules.validate().map_err(|reason| PolicyError::InvalidRules {
            policy: name.clone(),
            reason,
        })?;
        Ok(Self { name, rules })
    }

    pub fn rules(&self) -> &ExitRules {
        &self.rules
    }
}

impl ExitPolicy for RulePolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self, entry: &Entry) -> Result<Box<dyn PositionTracker>, PolicyError> {
        let sign = entry.direction.sign();
        let level = |pct: f64, toward_profit: bool| {
            let s = if toward_profit { sign } else { -sign };
            entry.entry_price * (1.0 + s * pct / 100.0)
        };
        Ok(Box::new(RuleTracker {
            direction: entry.direction,
            stop: self.rules.stop_loss_pct.map(|p| level(p, false)),
            target: self.rules.take_profit_pct.map(|p| level(p, true)),
            trailing_pct: self.rules.trailing_stop_pct,
            max_bars_held: self.rules.max_bars_held,
            close_at: self.rules.close_at,
            watermark: entry.entry_price,
        }))
    }
}

struct RuleTracker {
    direction: Direction,
    stop: Option<f64>,
    target: Option<f64>,
    trailing_pct: Option<f64>,
    max_bars_held: Option<usize>,
    close_at: Option<NaiveTime>,
    /// Best price seen on bars before the current one (entry price at start).
    watermark: f64,
}

impl RuleTracker {
    /// Fill for an adverse level (stop or trailing stop), if touched.
    fn adverse_fill(&self, level: f64, bar: &Bar) -> Option<f64> {
        match self.direction {
            Direction::Long if bar.low <= level => Some(if bar.open <= level { bar.open } else { level }),
            Direction::Short if bar.high >= level => {
                Some(if bar.open >= level { bar.open } else { level })
            }
            _ => None,
        }
    }

    /// Fill for a favourable level (target), if touched.
    fn favourable_fill(&self, level: f64, bar: &Bar) -> Option<f64> {
        match self.direction {
            Direction::Long if bar.high >= level => Some(if bar.open >= level { bar.open } else { level }),
            Direction::Short if bar.low <= level => {
                Some(if bar.open <= level { bar.open } else { level })
            }
            _ => None,
        }
    }

    fn trailing_level(&self) -> Option<f64> {
        let pct = self.trailing_pct?;
        Some(match self.direction {
            Direction::Long => self.watermark * (1.0 - pct / 100.0),
            Direction::Short => self.watermark * (1.0 + pct / 100.0),
        })
    }

    fn decide(&self, bar: &Bar, bars_held: usize) -> ExitDecision {
        if let Some(price) = self.stop.and_then(|l| self.adverse_fill(l, bar)) {
            return ExitDecision::Exit {
                price,
                reason: ExitReason::StopLoss,
            };
        }
        if let Some(price) = self.target.and_then(|l| self.favourable_fill(l, bar)) {
            return ExitDecision::Exit {
                price,
                reason: ExitReason::TakeProfit,
            };
        }
        if let Some(price) = self.trailing_level().and_then(|l| self.adverse_fill(l, bar)) {
            return ExitDecision::Exit {
                price,
                reason: ExitReason::TrailingStop,
            };
        }
        if self.close_at.is_some_and(|t| bar.time_of_day() >= t) {
            return ExitDecision::Exit {
                price: bar.open,
                reason: ExitReason::TimeExit,
            };
        }
        if self.max_bars_held.is_some_and(|n| bars_held >= n) {
            return ExitDecision::Exit {
                price: bar.close,
                reason: ExitReason::TimeExit,
            };
        }
        ExitDecision::Hold
    }
}

impl PositionTracker for RuleTracker {
    fn on_bar(&mut self, bar: &Bar, bars_held: usize) -> Result<ExitDecision, PolicyError> {
        let decision = self.decide(bar, bars_held);
        self.watermark = match self.direction {
            Direction::Long => self.watermark.max(bar.high),
            Direction::Short => self.watermark.min(bar.low),
        };
        Ok(decision)
    }
}
