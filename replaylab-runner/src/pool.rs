//! Bounded worker pool over (ticker, date) units.
//!
//! Units are independent: each gets its own cursor and accumulator inside
//! `DetectorRunner::run_unit`, so they run on a fixed-size Rayon pool with no
//! cross-unit synchronization. Two budgets apply:
//! - per unit (`RunnerConfig::unit_timeout_ms`), enforced by the runner
//! - per plan (`PoolConfig::plan_timeout_ms`): units not yet started when it
//!   expires are recorded as `Cancelled`; finished units are kept. A plan
//!   spanning several pool calls passes one deadline to `run_units_until`.
//!
//! A fatal store error stops scheduling and is returned to the caller.

use chrono::{Datelike, NaiveDate, Weekday};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

use replaylab_core::data::{BarStore, StoreError, Timeframe};
use replaylab_core::detect::{DetectorRunner, UnitOutcome, UnitStatus};
use replaylab_core::domain::UnitKey;

pub const DEFAULT_MAX_WORKERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_workers: usize,
    pub plan_timeout_ms: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            plan_timeout_ms: None,
        }
    }
}

impl PoolConfig {
    pub fn plan_timeout(&self) -> Option<Duration> {
        self.plan_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to build worker pool: {0}")]
    Build(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Weekday ticker-days in `[start, end]`, sorted by ticker then date.
pub fn enumerate_units(tickers: &[String], start: NaiveDate, end: NaiveDate) -> Vec<UnitKey> {
    let mut units: Vec<UnitKey> = tickers
        .iter()
        .flat_map(|ticker| {
            start
                .iter_days()
                .take_while(move |d| *d <= end)
                .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
                .map(move |d| UnitKey::new(ticker.as_str(), d))
        })
        .collect();
    units.sort();
    units.dedup();
    units
}

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    plan_timeout: Option<Duration>,
}

impl WorkerPool {
    pub fn new(config: &PoolConfig) -> Result<Self, PoolError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_workers.max(1))
            .thread_name(|i| format!("replay-worker-{i}"))
            .build()
            .map_err(|e| PoolError::Build(e.to_string()))?;
        Ok(Self {
            pool,
            plan_timeout: config.plan_timeout(),
        })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// The plan deadline if the plan started now.
    pub fn deadline_from_now(&self) -> Option<Instant> {
        self.plan_timeout.map(|t| Instant::now() + t)
    }

    /// Replay every unit. The result is sorted by `UnitKey` and has exactly
    /// one outcome per input unit.
    pub fn run_units(
        &self,
        runner: &DetectorRunner,
        store: &dyn BarStore,
        units: &[UnitKey],
        timeframe: Timeframe,
    ) -> Result<Vec<UnitOutcome>, PoolError> {
        self.run_units_until(runner, store, units, timeframe, self.deadline_from_now())
    }

    /// `run_units` against an externally owned plan deadline.
    pub fn run_units_until(
        &self,
        runner: &DetectorRunner,
        store: &dyn BarStore,
        units: &[UnitKey],
        timeframe: Timeframe,
        deadline: Option<Instant>,
    ) -> Result<Vec<UnitOutcome>, PoolError> {
        let abort = AtomicBool::new(false);
        let fatal: Mutex<Option<StoreError>> = Mutex::new(None);

        info!(
            "scheduling {} units on {} workers",
            units.len(),
            self.workers()
        );

        let mut outcomes: Vec<UnitOutcome> = self.pool.install(|| {
            units
                .par_iter()
                .map(|key| {
                    if abort.load(Ordering::Relaxed)
                        || deadline.is_some_and(|d| Instant::now() >= d)
                    {
                        return UnitOutcome::with_status(key.clone(), UnitStatus::Cancelled);
                    }
                    match runner.run_unit(store, &key.ticker, key.date, timeframe) {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            abort.store(true, Ordering::Relaxed);
                            if let Ok(mut slot) = fatal.lock() {
                                slot.get_or_insert(e);
                            }
                            UnitOutcome::with_status(key.clone(), UnitStatus::Cancelled)
                        }
                    }
                })
                .collect()
        });

        if let Some(e) = fatal.into_inner().ok().flatten() {
            warn!("store failure aborted the run: {e}");
            return Err(PoolError::Store(e));
        }

        let cancelled = outcomes
            .iter()
            .filter(|o| o.status == UnitStatus::Cancelled)
            .count();
        if cancelled > 0 {
            warn!("plan timeout: {cancelled} of {} units never started", units.len());
        }
        debug!("{} units finished", outcomes.len() - cancelled);

        outcomes.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(outcomes)
    }
}
