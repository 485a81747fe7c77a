//! Detector Runner: drives one detector across one ticker-day.
//!
//! Every step after warm-up is evaluated before anything is selected, so the
//! default `BestOfDay` policy sees the whole session's candidates. A detector
//! error or panic counts as "no signal" for that step; a run of consecutive
//! failures aborts the unit and is reported, never swallowed.
//!
//! The unit timeout is cooperative. The deadline is checked once after the
//! bar fetch and again before every step; a store read or a `detect` call
//! that blocks is not interrupted, it is only caught at the next check.

use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::accumulator::Accumulator;
use super::detector::{Detection, Detector, DetectorError};
use crate::data::{assess, BarStore, DataQualityReport, StoreError, Timeframe};
use crate::domain::{Signal, UnitKey};
use crate::replay::{ReplayCursor, TickerDay};

/// Default number of back-to-back step failures that abort a ticker-day.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: usize = 3;

/// Which of a day's candidates survive the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", content = "k", rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Evaluate every step, keep the single strongest candidate.
    #[default]
    BestOfDay,
    /// Evaluate every step, keep the `k` strongest candidates.
    TopK(usize),
    /// Stop at the first candidate. Biased toward early, weaker signals;
    /// only for reproducing legacy results.
    FirstFound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Replaces the detector's own `warmup_bars()` when set.
    pub warmup_override: Option<usize>,
    pub selection: SelectionPolicy,
    pub max_consecutive_failures: usize,
    /// Wall-clock budget per unit, including the bar fetch.
    pub unit_timeout_ms: Option<u64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            warmup_override: None,
            selection: SelectionPolicy::BestOfDay,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            unit_timeout_ms: None,
        }
    }
}

impl RunnerConfig {
    pub fn unit_timeout(&self) -> Option<Duration> {
        self.unit_timeout_ms.map(Duration::from_millis)
    }
}

/// How a unit ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitStatus {
    Completed,
    DataUnavailable { reason: String },
    DetectorFailed { step: usize, errors: Vec<String> },
    TimedOut { step: usize, elapsed_ms: u64 },
    /// Never started: the plan deadline passed first.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub key: UnitKey,
    pub status: UnitStatus,
    /// Selected signals, already ranked.
    pub signals: Vec<Signal>,
    /// Candidates seen before selection.
    pub candidates: usize,
    pub steps: usize,
    pub step_failures: usize,
    pub quality: Option<DataQualityReport>,
}

impl UnitOutcome {
    pub fn with_status(key: UnitKey, status: UnitStatus) -> Self {
        Self {
            key,
            status,
            signals: Vec::new(),
            candidates: 0,
            steps: 0,
            step_failures: 0,
            quality: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, UnitStatus::Completed)
    }

    /// The store returned bars for this unit, whatever happened afterwards.
    pub fn had_data(&self) -> bool {
        matches!(
            self.status,
            UnitStatus::Completed | UnitStatus::DetectorFailed { .. } | UnitStatus::TimedOut { .. }
        )
    }
}

pub struct DetectorRunner {
    detector: Arc<dyn Detector>,
    config: RunnerConfig,
}

impl DetectorRunner {
    pub fn new(detector: Arc<dyn Detector>, config: RunnerConfig) -> Self {
        Self { detector, config }
    }

    pub fn detector(&self) -> &Arc<dyn Detector> {
        &self.detector
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn warmup(&self) -> usize {
        self.config
            .warmup_override
            .unwrap_or_else(|| self.detector.warmup_bars())
    }

    /// Fetch one ticker-day from `store` and replay it.
    ///
    /// Only a fatal store error (`StoreError::Unavailable`) is returned as
    /// `Err`; every other problem becomes a unit status.
    pub fn run_unit(
        &self,
        store: &dyn BarStore,
        ticker: &str,
        date: NaiveDate,
        timeframe: Timeframe,
    ) -> Result<UnitOutcome, StoreError> {
        let started = Instant::now();
        let deadline = self.config.unit_timeout().map(|t| started + t);
        let key = UnitKey::new(ticker, date);

        let fetched = store
            .get_bars(ticker, date, timeframe)
            .and_then(|bars| Ok((bars, store.prior_close(ticker, date, timeframe)?)));
        let (bars, prior_close) = match fetched {
            Ok(v) => v,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("{key}: data unavailable ({e})");
                return Ok(UnitOutcome::with_status(
                    key,
                    UnitStatus::DataUnavailable {
                        reason: e.to_string(),
                    },
                ));
            }
        };

        let quality = assess(&bars, timeframe);
        let day = match TickerDay::new(ticker, date, bars, prior_close) {
            Ok(day) if !day.is_empty() => day,
            Ok(_) => {
                debug!("{key}: no bars");
                return Ok(UnitOutcome::with_status(
                    key,
                    UnitStatus::DataUnavailable {
                        reason: "no bars for ticker-day".into(),
                    },
                ));
            }
            Err(e) => {
                warn!("{e}");
                return Ok(UnitOutcome::with_status(
                    key,
                    UnitStatus::DataUnavailable {
                        reason: e.to_string(),
                    },
                ));
            }
        };

        if deadline.is_some_and(|d| Instant::now() >= d) {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            warn!("{key}: timed out loading bars after {elapsed_ms} ms");
            let mut outcome =
                UnitOutcome::with_status(key, UnitStatus::TimedOut { step: 0, elapsed_ms });
            outcome.quality = Some(quality);
            return Ok(outcome);
        }

        let mut outcome = self.run_day(&day, deadline);
        outcome.quality = Some(quality);
        Ok(outcome)
    }

    /// Replay an already-loaded ticker-day.
    pub fn run_day(&self, day: &TickerDay, deadline: Option<Instant>) -> UnitOutcome {
        let started = Instant::now();
        let key = day.key().clone();
        let warmup = self.warmup();
        let max_failures = self.config.max_consecutive_failures.max(1);

        let mut cursor = ReplayCursor::new(day);
        let mut acc = Accumulator::new();
        let mut candidates: Vec<Signal> = Vec::new();
        let mut steps = 0;
        let mut step_failures = 0;
        let mut recent_errors: Vec<String> = Vec::new();

        while cursor.advance() {
            let (Some(i), Some(bar)) = (cursor.index(), cursor.latest()) else {
                break;
            };
            let bar = bar.clone();

            if deadline.is_some_and(|d| Instant::now() >= d) {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                warn!("{key}: timed out at step {i} after {elapsed_ms} ms");
                let mut outcome =
                    UnitOutcome::with_status(key, UnitStatus::TimedOut { step: i, elapsed_ms });
                outcome.steps = steps;
                outcome.step_failures = step_failures;
                return outcome;
            }

            // Session VWAP covers warm-up bars too.
            acc.observe_vwap(i, &bar);
            if i < warmup {
                continue;
            }
            steps += 1;

            match self.step(&cursor, &mut acc) {
                Ok(Some(detection)) => {
                    recent_errors.clear();
                    candidates.push(Signal {
                        ticker: day.ticker().to_string(),
                        date: day.date(),
                        time: bar.time_of_day(),
                        bar_index: i,
                        direction: detection.direction,
                        strength: detection.strength,
                        metrics: detection.metrics,
                    });
                    if self.config.selection == SelectionPolicy::FirstFound {
                        break;
                    }
                }
                Ok(None) => recent_errors.clear(),
                Err(e) => {
                    step_failures += 1;
                    debug!("{key}: step {i} failed: {e}");
                    recent_errors.push(e.to_string());
                    if recent_errors.len() >= max_failures {
                        warn!(
                            "{key}: detector aborted after {} consecutive failures at step {i}",
                            recent_errors.len()
                        );
                        let mut outcome = UnitOutcome::with_status(
                            key,
                            UnitStatus::DetectorFailed {
                                step: i,
                                errors: recent_errors,
                            },
                        );
                        outcome.candidates = candidates.len();
                        outcome.steps = steps;
                        outcome.step_failures = step_failures;
                        return outcome;
                    }
                }
            }
        }

        let candidate_count = candidates.len();
        let signals = select(candidates, self.config.selection);
        debug!(
            "{key}: {steps} steps, {candidate_count} candidates, {} selected",
            signals.len()
        );

        UnitOutcome {
            key,
            status: UnitStatus::Completed,
            signals,
            candidates: candidate_count,
            steps,
            step_failures,
            quality: None,
        }
    }

    /// One guarded detector call: panics and contract violations become errors.
    fn step(
        &self,
        cursor: &ReplayCursor<'_>,
        acc: &mut Accumulator,
    ) -> Result<Option<Detection>, DetectorError> {
        let detector = &self.detector;
        let result = catch_unwind(AssertUnwindSafe(|| detector.detect(cursor, acc)))
            .unwrap_or_else(|payload| Err(DetectorError::Panicked(panic_message(&*payload))));
        let detection = result?;
        if let Some(d) = &detection {
            d.check_contract()?;
        }
        Ok(detection)
    }
}

/// Apply a selection policy to one day's candidates.
pub fn select(mut candidates: Vec<Signal>, policy: SelectionPolicy) -> Vec<Signal> {
    match policy {
        SelectionPolicy::FirstFound => {
            candidates.truncate(1);
            candidates
        }
        SelectionPolicy::BestOfDay => {
            candidates.sort_by(Signal::rank_cmp);
            candidates.truncate(1);
            candidates
        }
        SelectionPolicy::TopK(k) => {
            candidates.sort_by(Signal::rank_cmp);
            candidates.truncate(k);
            candidates
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".into()
    }
}
