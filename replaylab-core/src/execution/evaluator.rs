//! Execution Evaluator: realizes filtered signals under every registered
//! exit policy.
//!
//! Entry is always the open of the bar after the signal bar. Each policy gets
//! its own tracker per signal and sees bars one at a time through a
//! `ReplayCursor`; a policy that errors or panics loses that one position,
//! every other (signal, policy) pair carries on.

use chrono::{NaiveDate, NaiveTime};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::{Entry, ExitDecision, ExitPolicy, PolicyError};
use crate::data::{BarStore, StoreError, Timeframe};
use crate::detect::runner::panic_message;
use crate::domain::{Bar, ExitReason, Signal, Trade};
use crate::replay::{ReplayCursor, TickerDay};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// Signal fired on the session's last bar.
    NoEntryBar,
    DataUnavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSignal {
    pub ticker: String,
    pub date: NaiveDate,
    pub signal_time: NaiveTime,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyFailure {
    pub policy: String,
    pub ticker: String,
    pub date: NaiveDate,
    pub signal_time: NaiveTime,
    pub error: PolicyError,
}

/// Fill-realism violations found on a realized trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub ticker: String,
    pub date: NaiveDate,
    pub entry_time: NaiveTime,
    pub errors: Vec<String>,
}

/// Everything one policy produced over the signal set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyRun {
    pub policy: String,
    pub trades: Vec<Trade>,
    pub failures: Vec<PolicyFailure>,
    pub validation_issues: Vec<ValidationIssue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// One entry per policy, in registration order.
    pub runs: Vec<PolicyRun>,
    /// Signals no policy could enter; shared by all policies.
    pub skipped: Vec<SkippedSignal>,
}

pub struct ExecutionEvaluator {
    policies: Vec<Arc<dyn ExitPolicy>>,
}

impl ExecutionEvaluator {
    pub fn new(policies: Vec<Arc<dyn ExitPolicy>>) -> Result<Self, PolicyError> {
        let mut seen = HashSet::new();
        for p in &policies {
            if !seen.insert(p.name().to_string()) {
                return Err(PolicyError::DuplicateName(p.name().to_string()));
            }
        }
        Ok(Self { policies })
    }

    pub fn policy_names(&self) -> Vec<String> {
        self.policies.iter().map(|p| p.name().to_string()).collect()
    }

    /// Re-read each signal's ticker-day from `store` and evaluate it.
    ///
    /// Signals are processed in input order, so the output is deterministic
    /// for a deterministic input. Only a fatal store error aborts.
    pub fn evaluate(
        &self,
        store: &dyn BarStore,
        timeframe: Timeframe,
        signals: &[Signal],
    ) -> Result<ExecutionOutcome, StoreError> {
        let mut days: BTreeMap<(String, NaiveDate), Result<TickerDay, String>> = BTreeMap::new();
        let mut outcome = self.empty_outcome();

        for signal in signals {
            let key = (signal.ticker.clone(), signal.date);
            if !days.contains_key(&key) {
                let day = match store.get_bars(&signal.ticker, signal.date, timeframe) {
                    Ok(bars) => TickerDay::new(&signal.ticker, signal.date, bars, None)
                        .map_err(|e| e.to_string()),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => Err(e.to_string()),
                };
                days.insert(key.clone(), day);
            }
            match days.get(&key) {
                Some(Ok(day)) => self.evaluate_signal(day, signal, &mut outcome),
                Some(Err(reason)) => outcome.skipped.push(skip(
                    signal,
                    SkipReason::DataUnavailable(reason.clone()),
                )),
                None => {}
            }
        }
        Ok(outcome)
    }

    /// Evaluate signals against an already-loaded ticker-day.
    pub fn evaluate_day(&self, day: &TickerDay, signals: &[Signal]) -> ExecutionOutcome {
        let mut outcome = self.empty_outcome();
        for signal in signals
            .iter()
            .filter(|s| s.ticker == day.ticker() && s.date == day.date())
        {
            self.evaluate_signal(day, signal, &mut outcome);
        }
        outcome
    }

    fn empty_outcome(&self) -> ExecutionOutcome {
        ExecutionOutcome {
            runs: self
                .policies
                .iter()
                .map(|p| PolicyRun {
                    policy: p.name().to_string(),
                    ..PolicyRun::default()
                })
                .collect(),
            skipped: Vec::new(),
        }
    }

    fn evaluate_signal(&self, day: &TickerDay, signal: &Signal, outcome: &mut ExecutionOutcome) {
        let signal_index = match locate_signal_bar(day, signal) {
            Some(i) => i,
            None => {
                outcome.skipped.push(skip(
                    signal,
                    SkipReason::DataUnavailable(format!(
                        "signal bar at {} not found on re-read",
                        signal.time
                    )),
                ));
                return;
            }
        };
        let Some(entry_bar) = day.bar_at(signal_index + 1) else {
            debug!(
                "{} {} {}: signal on last bar, no entry",
                signal.ticker, signal.date, signal.time
            );
            outcome.skipped.push(skip(signal, SkipReason::NoEntryBar));
            return;
        };

        let entry = Entry {
            ticker: signal.ticker.clone(),
            date: signal.date,
            direction: signal.direction,
            signal_time: signal.time,
            entry_bar: signal_index + 1,
            entry_time: entry_bar.time_of_day(),
            entry_price: entry_bar.open,
        };

        for (policy, run) in self.policies.iter().zip(outcome.runs.iter_mut()) {
            match realize(day, signal, &entry, policy.as_ref()) {
                Ok(trade) => {
                    let errors = trade.validate(entry_bar);
                    if !errors.is_empty() {
                        warn!(
                            "{} {} [{}]: fill validation failed: {}",
                            trade.ticker,
                            trade.date,
                            run.policy,
                            errors.join("; ")
                        );
                        run.validation_issues.push(ValidationIssue {
                            ticker: trade.ticker.clone(),
                            date: trade.date,
                            entry_time: trade.entry_time,
                            errors,
                        });
                    }
                    run.trades.push(trade);
                }
                Err(error) => {
                    warn!("{} {}: {error}", signal.ticker, signal.date);
                    run.failures.push(PolicyFailure {
                        policy: run.policy.clone(),
                        ticker: signal.ticker.clone(),
                        date: signal.date,
                        signal_time: signal.time,
                        error,
                    });
                }
            }
        }
    }
}

fn skip(signal: &Signal, reason: SkipReason) -> SkippedSignal {
    SkippedSignal {
        ticker: signal.ticker.clone(),
        date: signal.date,
        signal_time: signal.time,
        reason,
    }
}

/// Index of the signal bar in a re-read day: trust `bar_index` when its time
/// matches, otherwise search by time.
fn locate_signal_bar(day: &TickerDay, signal: &Signal) -> Option<usize> {
    match day.bar_at(signal.bar_index) {
        Some(bar) if bar.time_of_day() == signal.time => Some(signal.bar_index),
        _ => (0..day.len()).find(|&i| day.bar_at(i).is_some_and(|b| b.time_of_day() == signal.time)),
    }
}

/// Run one policy over one position, one bar at a time.
fn realize(
    day: &TickerDay,
    signal: &Signal,
    entry: &Entry,
    policy: &dyn ExitPolicy,
) -> Result<Trade, PolicyError> {
    let name = policy.name().to_string();

    let mut tracker = catch_unwind(AssertUnwindSafe(|| policy.start(entry)))
        .unwrap_or_else(|p| Err(panicked(&name, &*p)))?;

    let mut cursor = ReplayCursor::new(day);
    if !cursor.advance_to(entry.entry_bar) {
        return Err(PolicyError::Failed {
            policy: name,
            reason: format!("entry bar {} out of range", entry.entry_bar),
        });
    }

    let mut highest = entry.entry_price;
    let mut lowest = entry.entry_price;

    loop {
        let (Some(index), Some(bar)) = (cursor.index(), cursor.latest()) else {
            return Err(PolicyError::Failed {
                policy: name,
                reason: "cursor lost position".into(),
            });
        };
        let bars_held = index - entry.entry_bar;
        highest = highest.max(bar.high);
        lowest = lowest.min(bar.low);

        let decision = catch_unwind(AssertUnwindSafe(|| tracker.on_bar(bar, bars_held)))
            .unwrap_or_else(|p| Err(panicked(&name, &*p)))?;

        if let ExitDecision::Exit { price, reason } = decision {
            if !price.is_finite() || !bar.contains_price(price) {
                return Err(PolicyError::ExitOutsideBar {
                    policy: name,
                    price,
                    low: bar.low,
                    high: bar.high,
                });
            }
            return Ok(build_trade(signal, entry, &name, index, bar, price, reason, highest, lowest));
        }

        if !cursor.advance() {
            return Ok(build_trade(
                signal,
                entry,
                &name,
                index,
                bar,
                bar.close,
                ExitReason::EndOfDay,
                highest,
                lowest,
            ));
        }
    }
}

fn panicked(policy: &str, payload: &(dyn std::any::Any + Send)) -> PolicyError {
    PolicyError::Panicked {
        policy: policy.to_string(),
        reason: panic_message(payload),
    }
}

#[allow(clippy::too_many_arguments)]
fn build_trade(
    signal: &Signal,
    entry: &Entry,
    policy: &str,
    exit_index: usize,
    exit_bar: &Bar,
    exit_price: f64,
    exit_reason: ExitReason,
    highest: f64,
    lowest: f64,
) -> Trade {
    let (pnl, pnl_percent) = Trade::pnl_for(entry.direction, entry.entry_price, exit_price);
    Trade {
        ticker: entry.ticker.clone(),
        date: entry.date,
        direction: entry.direction,
        policy: policy.to_string(),
        signal_time: signal.time,
        signal_strength: signal.strength,
        entry_bar: entry.entry_bar,
        entry_time: entry.entry_time,
        entry_price: entry.entry_price,
        exit_bar: exit_index,
        exit_time: exit_bar.time_of_day(),
        exit_price,
        exit_reason,
        highest_price: highest,
        lowest_price: lowest,
        pnl,
        pnl_percent,
        bars_held: exit_index - entry.entry_bar,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemoryBarStore;
    use crate::domain::Direction;
    use crate::execution::{ExitRules, PositionTracker, RulePolicy};
    use std::collections::BTreeMap;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 23).unwrap()
    }

    fn bars(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let ts = date().and_hms_opt(9, 30, 0).unwrap()
                    + chrono::Duration::minutes(5 * i as i64);
                Bar::new(ts, c, c + 0.05, c - 0.05, c, 1_000)
            })
            .collect()
    }

    fn signal_at(index: usize, bars: &[Bar]) -> Signal {
        Signal {
            ticker: "MU".into(),
            date: date(),
            time: bars[index].time_of_day(),
            bar_index: index,
            direction: Direction::Long,
            strength: 80.0,
            metrics: BTreeMap::new(),
        }
    }

    fn policy(name: &str, rules: ExitRules) -> Arc<dyn ExitPolicy> {
        Arc::new(RulePolicy::new(name, rules).unwrap())
    }

    struct Exploding;

    impl ExitPolicy for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }
        fn start(&self, _entry: &Entry) -> Result<Box<dyn PositionTracker>, PolicyError> {
            Ok(Box::new(ExplodingTracker))
        }
    }

    struct ExplodingTracker;

    impl PositionTracker for ExplodingTracker {
        fn on_bar(&mut self, _bar: &Bar, bars_held: usize) -> Result<ExitDecision, PolicyError> {
            if bars_held == 1 {
                panic!("tracker bug");
            }
            Ok(ExitDecision::Hold)
        }
    }

    struct FarAway;

    impl ExitPolicy for FarAway {
        fn name(&self) -> &str {
            "far_away"
        }
        fn start(&self, _entry: &Entry) -> Result<Box<dyn PositionTracker>, PolicyError> {
            Ok(Box::new(FarAwayTracker))
        }
    }

    struct FarAwayTracker;

    impl PositionTracker for FarAwayTracker {
        fn on_bar(&mut self, bar: &Bar, _bars_held: usize) -> Result<ExitDecision, PolicyError> {
            Ok(ExitDecision::Exit {
                price: bar.high * 2.0,
                reason: ExitReason::TakeProfit,
            })
        }
    }

    #[test]
    fn entry_is_next_bar_open() {
        let b = bars(&[10.0, 10.1, 10.2, 10.3, 10.4]);
        let day = TickerDay::new("MU", date(), b.clone(), None).unwrap();
        let ev = ExecutionEvaluator::new(vec![policy("eod", ExitRules::default())]).unwrap();
        let out = ev.evaluate_day(&day, &[signal_at(1, &b)]);
        let t = &out.runs[0].trades[0];
        assert_eq!(t.entry_bar, 2);
        assert_eq!(t.entry_price, 10.2);
        assert_eq!(t.exit_reason, ExitReason::EndOfDay);
        assert_eq!(t.exit_price, 10.4);
        assert_eq!(t.bars_held, 2);
        assert!(out.runs[0].validation_issues.is_empty());
    }

    #[test]
    fn last_bar_signal_is_skipped() {
        let b = bars(&[10.0, 10.1, 10.2]);
        let day = TickerDay::new("MU", date(), b.clone(), None).unwrap();
        let ev = ExecutionEvaluator::new(vec![policy("eod", ExitRules::default())]).unwrap();
        let out = ev.evaluate_day(&day, &[signal_at(2, &b)]);
        assert!(out.runs[0].trades.is_empty());
        assert_eq!(out.skipped[0].reason, SkipReason::NoEntryBar);
    }

    #[test]
    fn panicking_policy_fails_alone() {
        let b = bars(&[10.0, 10.1, 10.2, 10.3, 10.4]);
        let day = TickerDay::new("MU", date(), b.clone(), None).unwrap();
        let ev = ExecutionEvaluator::new(vec![
            Arc::new(Exploding),
            policy("eod", ExitRules::default()),
        ])
        .unwrap();
        let out = ev.evaluate_day(&day, &[signal_at(0, &b)]);
        assert!(out.runs[0].trades.is_empty());
        assert!(matches!(
            out.runs[0].failures[0].error,
            PolicyError::Panicked { .. }
        ));
        assert_eq!(out.runs[1].trades.len(), 1);
    }

    #[test]
    fn exit_outside_bar_is_policy_failure() {
        let b = bars(&[10.0, 10.1, 10.2]);
        let day = TickerDay::new("MU", date(), b.clone(), None).unwrap();
        let ev = ExecutionEvaluator::new(vec![Arc::new(FarAway)]).unwrap();
        let out = ev.evaluate_day(&day, &[signal_at(0, &b)]);
        assert!(matches!(
            out.runs[0].failures[0].error,
            PolicyError::ExitOutsideBar { .. }
        ));
    }

    #[test]
    fn duplicate_policy_names_rejected() {
        let err = ExecutionEvaluator::new(vec![
            policy("same", ExitRules::default()),
            policy("same", ExitRules::bracket(2.0, 1.0)),
        ])
        .err()
        .unwrap();
        assert_eq!(err, PolicyError::DuplicateName("same".into()));
    }

    #[test]
    fn evaluate_rereads_from_store() {
        let b = bars(&[10.0, 10.1, 10.5, 10.0, 9.0]);
        let store = MemoryBarStore::new().with_bars("MU", Timeframe::FiveMinutes, b.clone());
        let ev = ExecutionEvaluator::new(vec![
            policy("tp2_sl1", ExitRules::bracket(2.0, 1.0)),
            policy("eod", ExitRules::default()),
        ])
        .unwrap();
        let out = ev
            .evaluate(&store, Timeframe::FiveMinutes, &[signal_at(0, &b)])
            .unwrap();
        assert_eq!(out.runs.len(), 2);
        // Entry 10.1; bar 2 opens at 10.5, through the 10.302 target.
        let tp = &out.runs[0].trades[0];
        assert_eq!(tp.exit_reason, ExitReason::TakeProfit);
        assert_eq!(tp.exit_bar, 2);
        assert_eq!(tp.exit_price, 10.5);
        let eod = &out.runs[1].trades[0];
        assert_eq!(eod.exit_reason, ExitReason::EndOfDay);
        assert_eq!(eod.exit_price, 9.0);
    }

    #[test]
    fn missing_day_skips_signal() {
        let b = bars(&[10.0, 10.1]);
        let store = MemoryBarStore::new();
        let ev = ExecutionEvaluator::new(vec![policy("eod", ExitRules::default())]).unwrap();
        let out = ev
            .evaluate(&store, Timeframe::FiveMinutes, &[signal_at(0, &b)])
            .unwrap();
        assert!(matches!(out.skipped[0].reason, SkipReason::DataUnavailable(_)));
    }
}
