//! Walk-forward validation: synthesize once on the training window, then test
//! the same detector unmodified on later, non-overlapping windows.
//!
//! Plan lifecycle: `Planned -> Training -> Testing(1..=n) -> Aggregated`.
//! Each test window runs the full backtest pipeline independently. A window
//! with zero eligible ticker-days stops the plan (a data problem); a window
//! whose detector produced no signals does not (a strategy outcome).
//!
//! The plan timeout is one deadline for the whole plan, synthesis included.
//! When it passes mid-window the plan ends in `TimedOut(k)`: finished windows
//! and the partial window are kept and aggregated, later windows never run.

use chrono::NaiveDate;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use replaylab_core::data::{BarStore, Timeframe};
use replaylab_core::detect::{
    Detector, RunnerConfig, StrategySynthesizer, SynthesisError, SynthesisRequest, TrainingBars,
};
use replaylab_core::domain::{Fingerprint, Trade};
use replaylab_core::execution::ExitPolicy;
use replaylab_core::filter::FilterConfig;
use replaylab_core::fingerprint::DetectorIdentity;

use crate::config::{check_tickers, ConfigError};
use crate::failures::FailureReport;
use crate::metrics::{MetricsConfig, RunMetrics};
use crate::pool::PoolConfig;
use crate::ranking::RankingMetric;
use crate::runner::{run_backtest_until, RunError, RunReport, RunRequest};
use crate::stats::{one_sample_t_test, TTest};

// ─── Windows ─────────────────────────────────────────────────────────

/// Inclusive calendar window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn overlaps(&self, other: &DateWindow) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

// ─── Plan ────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct WalkForwardPlan {
    pub description: String,
    pub tickers: Vec<String>,
    pub timeframe: Timeframe,
    pub train: DateWindow,
    /// Ordered, non-overlapping, all after `train`.
    pub tests: Vec<DateWindow>,
    pub filter: FilterConfig,
    pub policies: Vec<Arc<dyn ExitPolicy>>,
    pub runner: RunnerConfig,
    pub pool: PoolConfig,
    pub metrics: MetricsConfig,
    pub ranking: RankingMetric,
}

impl WalkForwardPlan {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_tickers(&self.tickers)?;
        if self.train.end < self.train.start {
            return Err(ConfigError::Windows(format!(
                "training window {} ends before it starts",
                self.train
            )));
        }
        if self.tests.is_empty() {
            return Err(ConfigError::Windows("no test windows".into()));
        }
        let mut prev = self.train;
        for (i, w) in self.tests.iter().enumerate() {
            if w.end < w.start {
                return Err(ConfigError::Windows(format!(
                    "test window {} ({w}) ends before it starts",
                    i + 1
                )));
            }
            if w.start <= prev.end {
                let what = if i == 0 {
                    format!("training window {prev}")
                } else {
                    format!("test window {i} ({prev})")
                };
                return Err(ConfigError::Windows(format!(
                    "test window {} ({w}) overlaps or precedes {what}",
                    i + 1
                )));
            }
            prev = *w;
        }
        // Filter, runner, pool and policy checks are shared with single runs.
        self.request_for(self.tests[0]).validate()
    }

    pub fn synthesis_request(&self) -> SynthesisRequest {
        SynthesisRequest {
            description: self.description.clone(),
            tickers: self.tickers.clone(),
            train_start: self.train.start,
            train_end: self.train.end,
            timeframe: self.timeframe,
        }
    }

    fn request_for(&self, window: DateWindow) -> RunRequest {
        RunRequest {
            tickers: self.tickers.clone(),
            start: window.start,
            end: window.end,
            timeframe: self.timeframe,
            filter: self.filter.clone(),
            policies: self.policies.clone(),
            runner: self.runner.clone(),
            pool: self.pool.clone(),
            metrics: self.metrics.clone(),
            ranking: self.ranking,
        }
    }
}

// ─── State machine ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "window", rename_all = "snake_case")]
pub enum PlanState {
    Planned,
    Training,
    /// 1-based test window index.
    Testing(usize),
    Aggregated,
    /// The plan deadline passed during this test window.
    TimedOut(usize),
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planned => write!(f, "PLANNED"),
            Self::Training => write!(f, "TRAINING"),
            Self::Testing(k) => write!(f, "TESTING({k})"),
            Self::Aggregated => write!(f, "AGGREGATED"),
            Self::TimedOut(k) => write!(f, "TIMED_OUT({k})"),
        }
    }
}

impl PlanState {
    /// Legal successor check for a plan with `windows` test windows.
    pub fn can_advance_to(self, next: PlanState, windows: usize) -> bool {
        match (self, next) {
            (Self::Planned, Self::Training) => true,
            (Self::Training, Self::Testing(1)) => windows >= 1,
            (Self::Testing(k), Self::Testing(j)) => j == k + 1 && j <= windows,
            (Self::Testing(k), Self::Aggregated) => k == windows,
            (Self::Testing(k), Self::TimedOut(j)) => j == k,
            _ => false,
        }
    }
}

struct PlanMachine {
    state: PlanState,
    windows: usize,
}

impl PlanMachine {
    fn new(windows: usize) -> Self {
        Self {
            state: PlanState::Planned,
            windows,
        }
    }

    fn advance(&mut self, next: PlanState) -> Result<(), WalkForwardError> {
        if !self.state.can_advance_to(next, self.windows) {
            return Err(WalkForwardError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        info!("walk-forward {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }
}

// ─── Results ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyWindow {
    pub policy: String,
    pub metrics: RunMetrics,
    pub trades: Vec<Trade>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowReport {
    /// 1-based.
    pub index: usize,
    pub window: DateWindow,
    pub eligible_units: usize,
    /// Units the plan deadline cancelled before they started.
    pub cancelled_units: usize,
    pub signal_count: usize,
    /// The detector ran on data and produced nothing that survived filtering.
    pub zero_signals: bool,
    pub fingerprint: Fingerprint,
    pub policies: Vec<PolicyWindow>,
    pub winner: Option<String>,
    pub failures: FailureReport,
}

/// One policy across every test window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyAggregate {
    pub policy: String,
    /// Metrics over the union of all windows' trades.
    pub metrics: RunMetrics,
    /// Per-window expectancy, in window order.
    pub window_expectancy_pct: Vec<f64>,
    /// Fraction of windows with positive expectancy.
    pub consistency: f64,
    /// t-test across per-window mean returns of windows with trades.
    /// Needs at least two such windows.
    pub window_t_test: Option<TTest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardReport {
    pub detector: DetectorIdentity,
    pub train: DateWindow,
    pub windows: Vec<WindowReport>,
    pub aggregate: Vec<PolicyAggregate>,
    pub state: PlanState,
}

impl WalkForwardReport {
    /// Every test window ran to completion and the plan was aggregated.
    pub fn is_complete(&self) -> bool {
        self.state == PlanState::Aggregated
    }

    /// The window the plan deadline cut short, if any.
    pub fn timed_out_at(&self) -> Option<usize> {
        match self.state {
            PlanState::TimedOut(k) => Some(k),
            _ => None,
        }
    }

    /// True when every window ran the synthesized detector.
    pub fn is_non_refitting(&self) -> bool {
        self.windows
            .iter()
            .all(|w| w.fingerprint == self.detector.fingerprint)
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum WalkForwardError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("bar store '{store}' is unavailable")]
    StoreUnavailable { store: String },
    #[error("synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),
    #[error("test window {index} ({window}) has no eligible ticker-days")]
    NoEligibleData { index: usize, window: DateWindow },
    #[error("test window {index} ({window}) failed: {source}")]
    Window {
        index: usize,
        window: DateWindow,
        #[source]
        source: RunError,
    },
    #[error("detector identity changed in window {index}: expected {expected}, found {found}")]
    DetectorChanged {
        index: usize,
        expected: String,
        found: String,
    },
    #[error("illegal plan transition {from} -> {to}")]
    IllegalTransition { from: PlanState, to: PlanState },
}

// ─── Driver ──────────────────────────────────────────────────────────

/// Run a walk-forward plan. `synthesize` is called exactly once.
///
/// Every window replays the same `Arc`, so the instance cannot be swapped.
/// The per-window fingerprint check guards the other way a detector can
/// refit: rewriting its own parameters between windows.
pub fn run_walk_forward(
    plan: &WalkForwardPlan,
    synthesizer: &dyn StrategySynthesizer,
    store: &dyn BarStore,
) -> Result<WalkForwardReport, WalkForwardError> {
    plan.validate()?;
    if !store.is_available() {
        return Err(WalkForwardError::StoreUnavailable {
            store: store.name().to_string(),
        });
    }
    let deadline = plan.pool.plan_timeout().map(|t| Instant::now() + t);
    let mut machine = PlanMachine::new(plan.tests.len());

    machine.advance(PlanState::Training)?;
    let synthesis = plan.synthesis_request();
    let training = TrainingBars::new(store, &synthesis);
    let detector: Arc<dyn Detector> = synthesizer.synthesize(&synthesis, &training)?;
    let identity = detector.identity();
    info!(
        "synthesized {} on {} via {}",
        identity.label(),
        plan.train,
        synthesizer.name()
    );

    let mut windows = Vec::with_capacity(plan.tests.len());
    for (i, window) in plan.tests.iter().enumerate() {
        let index = i + 1;
        machine.advance(PlanState::Testing(index))?;

        let request = plan.request_for(*window);
        let report = run_backtest_until(&request, store, Arc::clone(&detector), deadline)
            .map_err(|source| WalkForwardError::Window {
                index,
                window: *window,
                source,
            })?;
        if report.detector.fingerprint != identity.fingerprint {
            return Err(WalkForwardError::DetectorChanged {
                index,
                expected: identity.label(),
                found: report.detector.label(),
            });
        }
        if report.timed_out() {
            warn!(
                "plan deadline passed in test window {index} ({window}): {} of {} units cancelled",
                report.cancelled_units, report.units
            );
            windows.push(window_report(index, *window, report));
            machine.advance(PlanState::TimedOut(index))?;
            break;
        }
        if report.no_eligible_data() {
            warn!("test window {index} ({window}) has no data; stopping plan");
            return Err(WalkForwardError::NoEligibleData {
                index,
                window: *window,
            });
        }
        if report.signals.is_empty() {
            info!("test window {index} ({window}): detector produced zero signals");
        }
        windows.push(window_report(index, *window, report));
    }

    if machine.state == PlanState::Testing(plan.tests.len()) {
        machine.advance(PlanState::Aggregated)?;
    }
    let aggregate = aggregate(&plan.policies, &windows, &plan.metrics);

    Ok(WalkForwardReport {
        detector: identity,
        train: plan.train,
        windows,
        aggregate,
        state: machine.state,
    })
}

fn window_report(index: usize, window: DateWindow, report: RunReport) -> WindowReport {
    WindowReport {
        index,
        window,
        eligible_units: report.eligible_units,
        cancelled_units: report.cancelled_units,
        signal_count: report.signals.len(),
        zero_signals: report.signals.is_empty(),
        fingerprint: report.detector.fingerprint,
        policies: report
            .policies
            .into_iter()
            .map(|p| PolicyWindow {
                policy: p.policy,
                metrics: p.metrics,
                trades: p.trades,
            })
            .collect(),
        winner: report.winner,
        failures: report.failures,
    }
}

fn aggregate(
    policies: &[Arc<dyn ExitPolicy>],
    windows: &[WindowReport],
    config: &MetricsConfig,
) -> Vec<PolicyAggregate> {
    policies
        .iter()
        .map(|policy| {
            let name = policy.name();
            let per_window: Vec<&PolicyWindow> = windows
                .iter()
                .filter_map(|w| w.policies.iter().find(|p| p.policy == name))
                .collect();

            let trades: Vec<Trade> = per_window
                .iter()
                .flat_map(|p| p.trades.iter().cloned())
                .collect();
            let expectancy: Vec<f64> = per_window
                .iter()
                .map(|p| p.metrics.expectancy_pct)
                .collect();
            let traded_means: Vec<f64> = per_window
                .iter()
                .filter(|p| p.metrics.trades > 0)
                .map(|p| p.metrics.expectancy_pct)
                .collect();
            let consistency = if expectancy.is_empty() {
                0.0
            } else {
                expectancy.iter().filter(|e| **e > 0.0).count() as f64 / expectancy.len() as f64
            };

            PolicyAggregate {
                policy: name.to_string(),
                metrics: RunMetrics::compute(&trades, config),
                window_expectancy_pct: expectancy,
                consistency,
                window_t_test: one_sample_t_test(&traded_means),
            }
        })
        .collect()
}
