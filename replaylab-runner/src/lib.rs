//! ReplayLab Runner: run orchestration, metrics, ranking, walk-forward.
//!
//! This crate builds on `replaylab-core` to provide:
//! - Bounded worker pool over (ticker, date) units with unit and plan timeouts
//! - Single-run backtests: replay, filter, multi-policy execution, metrics
//! - Metrics engine with guarded Sharpe and sample-gated significance
//! - Policy ranking and Benjamini-Hochberg adjustment across policies
//! - Walk-forward validation with a single synthesis step
//! - TOML configuration, failure reports, JSON/CSV export

pub mod config;
pub mod export;
pub mod failures;
pub mod metrics;
pub mod pool;
pub mod ranking;
pub mod runner;
pub mod stats;
pub mod walk_forward;

pub use config::{ConfigError, ExitPolicyConfig, RunConfig, WalkForwardFileConfig};
pub use export::{save_run_artifacts, save_walk_forward_artifacts};
pub use failures::{FailureReport, UnitFailure, UnitFailureKind};
pub use metrics::{MetricsConfig, RunMetrics, Significance, PROFIT_FACTOR_SENTINEL};
pub use pool::{enumerate_units, PoolConfig, PoolError, WorkerPool};
pub use ranking::{rank_policies, PolicyRank, RankingMetric};
pub use runner::{run_backtest, PolicyReport, RunError, RunReport, RunRequest};
pub use stats::{benjamini_hochberg, one_sample_t_test, TTest};
pub use walk_forward::{
    run_walk_forward, DateWindow, PlanState, WalkForwardError, WalkForwardPlan,
    WalkForwardReport, WindowReport,
};
