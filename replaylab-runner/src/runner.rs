//! Backtest runner: wires the detector runner, worker pool, signal filter,
//! execution evaluator and metrics together.
//!
//! One entry point, `run_backtest()`, used by the CLI directly and by the
//! walk-forward validator once per test window.

use chrono::NaiveDate;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use replaylab_core::data::{BarStore, StoreError, Timeframe};
use replaylab_core::detect::{Detector, DetectorRunner, RunnerConfig};
use replaylab_core::domain::{Signal, Trade};
use replaylab_core::execution::{
    ExecutionEvaluator, ExitPolicy, PolicyError, PolicyFailure, ValidationIssue,
};
use replaylab_core::filter::{FilterConfig, FilterStats, SignalFilter};
use replaylab_core::fingerprint::DetectorIdentity;

use crate::config::{check_policy_names, check_range, check_runner, check_tickers, ConfigError};
use crate::failures::FailureReport;
use crate::metrics::{MetricsConfig, RunMetrics};
use crate::pool::{enumerate_units, PoolConfig, PoolError, WorkerPool};
use crate::ranking::{rank_policies, winner, PolicyRank, RankingMetric};
use crate::stats::benjamini_hochberg;

/// Errors that abort a whole run. Unit- and policy-level failures never do;
/// they land in the `FailureReport`.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("bar store '{store}' is unavailable")]
    StoreUnavailable { store: String },
    #[error("bar store failure: {0}")]
    Store(#[from] StoreError),
    #[error("worker pool: {0}")]
    Pool(String),
    #[error("exit policy setup: {0}")]
    Policy(#[from] PolicyError),
}

impl From<PoolError> for RunError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Store(e) => RunError::Store(e),
            PoolError::Build(reason) => RunError::Pool(reason),
        }
    }
}

/// Everything one run needs, already resolved.
#[derive(Clone)]
pub struct RunRequest {
    pub tickers: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub timeframe: Timeframe,
    pub filter: FilterConfig,
    pub policies: Vec<Arc<dyn ExitPolicy>>,
    pub runner: RunnerConfig,
    pub pool: PoolConfig,
    pub metrics: MetricsConfig,
    pub ranking: RankingMetric,
}

impl RunRequest {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_tickers(&self.tickers)?;
        check_range(self.start, self.end)?;
        self.filter.validate()?;
        check_runner(&self.runner, &self.pool)?;
        check_policy_names(self.policies.iter().map(|p| p.name()))
    }
}

/// One exit policy's results on the shared signal set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyReport {
    pub policy: String,
    pub trades: Vec<Trade>,
    pub metrics: RunMetrics,
    pub failures: Vec<PolicyFailure>,
    pub validation_issues: Vec<ValidationIssue>,
    /// Benjamini-Hochberg adjusted two-sided p-value across the policies
    /// that were tested. `None` when this policy's significance was not.
    pub adjusted_p: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub detector: DetectorIdentity,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub timeframe: Timeframe,
    /// Ticker-days scheduled.
    pub units: usize,
    /// Ticker-days the store had bars for.
    pub eligible_units: usize,
    /// Ticker-days never started because the plan deadline passed first.
    pub cancelled_units: usize,
    /// Candidates produced by the runner before filtering.
    pub candidates: usize,
    pub signals: Vec<Signal>,
    pub filter_stats: FilterStats,
    pub policies: Vec<PolicyReport>,
    pub ranking: Vec<PolicyRank>,
    pub winner: Option<String>,
    pub failures: FailureReport,
}

impl RunReport {
    pub fn policy(&self, name: &str) -> Option<&PolicyReport> {
        self.policies.iter().find(|p| p.policy == name)
    }

    /// The plan deadline cut the run short; the results cover only the
    /// units that finished.
    pub fn timed_out(&self) -> bool {
        self.cancelled_units > 0
    }

    /// Every scheduled unit came back without bars. A plan timeout is not
    /// a data problem and never counts here.
    pub fn no_eligible_data(&self) -> bool {
        self.eligible_units == 0 && self.cancelled_units == 0
    }
}

/// Run one backtest.
///
/// Configuration and total store outage are checked before any replay. The
/// plan timeout, if any, starts now.
pub fn run_backtest(
    request: &RunRequest,
    store: &dyn BarStore,
    detector: Arc<dyn Detector>,
) -> Result<RunReport, RunError> {
    let deadline = request.pool.plan_timeout().map(|t| Instant::now() + t);
    run_backtest_until(request, store, detector, deadline)
}

/// `run_backtest` against a deadline owned by an enclosing plan.
pub(crate) fn run_backtest_until(
    request: &RunRequest,
    store: &dyn BarStore,
    detector: Arc<dyn Detector>,
    deadline: Option<Instant>,
) -> Result<RunReport, RunError> {
    request.validate()?;
    if !store.is_available() {
        return Err(RunError::StoreUnavailable {
            store: store.name().to_string(),
        });
    }
    let filter = SignalFilter::new(request.filter.clone()).map_err(ConfigError::from)?;
    let evaluator = ExecutionEvaluator::new(request.policies.clone())?;

    let identity = detector.identity();
    let units = enumerate_units(&request.tickers, request.start, request.end);
    info!(
        "run {}..{} {}: {} units, detector {}",
        request.start,
        request.end,
        request.timeframe,
        units.len(),
        identity.label()
    );

    // ── Replay ──
    let runner = DetectorRunner::new(detector, request.runner.clone());
    let pool = WorkerPool::new(&request.pool)?;
    let outcomes = pool.run_units_until(&runner, store, &units, request.timeframe, deadline)?;

    let mut failures = FailureReport::from_outcomes(&outcomes);
    for f in &failures.units {
        warn!("unit {} failed: {:?}", f.unit, f.kind);
    }
    let eligible_units = outcomes.iter().filter(|o| o.had_data()).count();
    let cancelled_units = failures.cancelled();
    let candidates = outcomes.iter().map(|o| o.candidates).sum();
    let raw: Vec<Signal> = outcomes.into_iter().flat_map(|o| o.signals).collect();

    // ── Filter ──
    let filtered = filter.apply(raw);
    info!(
        "filter kept {} of {} signals",
        filtered.stats.output, filtered.stats.input
    );

    // ── Execute ──
    let execution = evaluator.evaluate(store, request.timeframe, &filtered.signals)?;
    failures.skipped_signals = execution.skipped;

    let mut policies: Vec<PolicyReport> = execution
        .runs
        .into_iter()
        .map(|run| {
            for f in &run.failures {
                warn!(
                    "policy {} failed on {}@{}: {}",
                    f.policy, f.ticker, f.date, f.error
                );
            }
            failures.policies.extend(run.failures.iter().cloned());
            PolicyReport {
                metrics: RunMetrics::compute(&run.trades, &request.metrics),
                policy: run.policy,
                trades: run.trades,
                failures: run.failures,
                validation_issues: run.validation_issues,
                adjusted_p: None,
            }
        })
        .collect();
    adjust_p_values(&mut policies);

    // ── Rank ──
    let ranking = rank_policies(
        policies.iter().map(|p| (p.policy.as_str(), &p.metrics)),
        request.ranking,
    );
    let winner = winner(&ranking).map(|r| r.policy.clone());
    match &winner {
        Some(w) => info!("winning policy by {}: {w}", request.ranking.as_str()),
        None => info!("no policy realized a trade"),
    }

    Ok(RunReport {
        detector: identity,
        start: request.start,
        end: request.end,
        timeframe: request.timeframe,
        units: units.len(),
        eligible_units,
        cancelled_units,
        candidates,
        signals: filtered.signals,
        filter_stats: filtered.stats,
        policies,
        ranking,
        winner,
        failures,
    })
}

fn adjust_p_values(policies: &mut [PolicyReport]) {
    let tested: Vec<(usize, f64)> = policies
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.metrics.significance.p_value().map(|v| (i, v)))
        .collect();
    let raw: Vec<f64> = tested.iter().map(|(_, p)| *p).collect();
    for ((i, _), adj) in tested.iter().zip(benjamini_hochberg(&raw)) {
        policies[*i].adjusted_p = Some(adj);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use replaylab_core::data::{MemoryBarStore, SyntheticBarStore};
    use replaylab_core::detectors::{BuiltinDetector, OrbParams};
    use replaylab_core::execution::{ExitRules, RulePolicy};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, day).unwrap()
    }

    fn policy(name: &str, rules: ExitRules) -> Arc<dyn ExitPolicy> {
        Arc::new(RulePolicy::new(name, rules).unwrap())
    }

    fn request() -> RunRequest {
        RunRequest {
            tickers: vec!["AMD".into(), "MU".into(), "NVDA".into()],
            start: d(3),
            end: d(14),
            timeframe: Timeframe::FiveMinutes,
            filter: FilterConfig {
                min_strength: 0.0,
                ..FilterConfig::default()
            },
            policies: vec![
                policy("tp2_sl1", ExitRules::bracket(2.0, 1.0)),
                policy("tp1_sl1", ExitRules::bracket(1.0, 1.0)),
            ],
            runner: RunnerConfig::default(),
            pool: PoolConfig::default(),
            metrics: MetricsConfig::default(),
            ranking: RankingMetric::ProfitFactor,
        }
    }

    fn orb() -> Arc<dyn Detector> {
        BuiltinDetector::OpeningRangeBreakout(OrbParams::default()).build()
    }

    #[test]
    fn runs_end_to_end_on_synthetic_data() {
        let store = SyntheticBarStore::new(11);
        let report = run_backtest(&request(), &store, orb()).unwrap();
        assert_eq!(report.units, 30);
        assert_eq!(report.eligible_units, 30);
        assert_eq!(report.policies.len(), 2);
        assert_eq!(report.ranking.len(), 2);
        assert_eq!(report.filter_stats.output, report.signals.len());
        for p in &report.policies {
            assert_eq!(p.metrics.trades, p.trades.len());
            assert!(p.validation_issues.is_empty());
            assert!(p.trades.iter().all(|t| t.policy == p.policy));
        }
        if let Some(w) = &report.winner {
            assert_eq!(w, &report.ranking[0].policy);
        }
    }

    #[test]
    fn empty_store_reports_data_unavailable_units() {
        let store = MemoryBarStore::new();
        let report = run_backtest(&request(), &store, orb()).unwrap();
        assert_eq!(report.eligible_units, 0);
        assert_eq!(report.failures.data_unavailable(), report.units);
        assert!(report.signals.is_empty());
        assert!(report.winner.is_none());
    }

    #[test]
    fn plan_timeout_is_kept_apart_from_missing_data() {
        let mut req = request();
        req.pool.plan_timeout_ms = Some(0);
        let report = run_backtest(&req, &SyntheticBarStore::new(11), orb()).unwrap();
        assert_eq!(report.cancelled_units, report.units);
        assert_eq!(report.eligible_units, 0);
        assert!(report.timed_out());
        assert!(!report.no_eligible_data());
        assert_eq!(report.failures.data_unavailable(), 0);

        let report = run_backtest(&request(), &MemoryBarStore::new(), orb()).unwrap();
        assert!(!report.timed_out());
        assert!(report.no_eligible_data());
    }

    #[test]
    fn offline_store_fails_before_replay() {
        let mut store = MemoryBarStore::new();
        store.set_offline(true);
        let err = run_backtest(&request(), &store, orb()).unwrap_err();
        assert!(matches!(err, RunError::StoreUnavailable { .. }));
    }

    #[test]
    fn invalid_request_is_a_config_error() {
        let mut req = request();
        req.filter.max_total = 0;
        let err = run_backtest(&req, &SyntheticBarStore::new(1), orb()).unwrap_err();
        assert!(matches!(err, RunError::Config(ConfigError::Filter(_))));

        let mut req = request();
        req.policies.push(policy("tp2_sl1", ExitRules::bracket(3.0, 1.0)));
        let err = run_backtest(&req, &SyntheticBarStore::new(1), orb()).unwrap_err();
        assert!(matches!(
            err,
            RunError::Config(ConfigError::DuplicatePolicy(_))
        ));
    }
}
