//! TOML configuration for backtest runs and walk-forward plans.
//!
//! Every file config converts into an in-process request (`RunRequest`,
//! `WalkForwardPlan`) and is validated before any bar is replayed. Dates and
//! times must be quoted strings (`start = "2025-11-03"`).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use replaylab_core::data::Timeframe;
use replaylab_core::detect::{BuiltinSynthesizer, RunnerConfig, SelectionPolicy};
use replaylab_core::detectors::BuiltinDetector;
use replaylab_core::execution::{ExitPolicy, ExitRules, RulePolicy};
use replaylab_core::filter::{FilterConfig, FilterConfigError};

use crate::metrics::MetricsConfig;
use crate::pool::PoolConfig;
use crate::ranking::RankingMetric;
use crate::runner::RunRequest;
use crate::walk_forward::{DateWindow, WalkForwardPlan};

/// Invalid experiment design. Always raised before replay starts.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {reason}")]
    Read { path: String, reason: String },
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("ticker set is empty")]
    NoTickers,
    #[error("date range ends ({end}) before it starts ({start})")]
    DateRange { start: NaiveDate, end: NaiveDate },
    #[error("invalid filter: {0}")]
    Filter(#[from] FilterConfigError),
    #[error("invalid detector: {0}")]
    Detector(String),
    #[error("at least one exit policy is required")]
    NoPolicies,
    #[error("duplicate exit policy name '{0}'")]
    DuplicatePolicy(String),
    #[error("invalid exit policy '{policy}': {reason}")]
    Policy { policy: String, reason: String },
    #[error("max_workers must be at least 1")]
    ZeroWorkers,
    #[error("max_consecutive_failures must be at least 1")]
    ZeroFailureThreshold,
    #[error("top_k selection needs k >= 1")]
    ZeroTopK,
    #[error("invalid walk-forward windows: {0}")]
    Windows(String),
}

fn default_timeframe() -> Timeframe {
    Timeframe::FiveMinutes
}

/// A named rule set as written in a config file.
///
/// ```toml
/// [[exit_policies]]
/// name = "tp2_sl1"
/// take_profit_pct = 2.0
/// stop_loss_pct = 1.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitPolicyConfig {
    pub name: String,
    #[serde(flatten)]
    pub rules: ExitRules,
}

impl ExitPolicyConfig {
    pub fn new(name: impl Into<String>, rules: ExitRules) -> Self {
        Self {
            name: name.into(),
            rules,
        }
    }

    pub fn to_policy(&self) -> Result<Arc<dyn ExitPolicy>, ConfigError> {
        let policy = RulePolicy::new(&self.name, self.rules.clone()).map_err(|e| {
            ConfigError::Policy {
                policy: self.name.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(Arc::new(policy))
    }
}

// ─── Shared checks ───────────────────────────────────────────────────

pub(crate) fn check_tickers(tickers: &[String]) -> Result<(), ConfigError> {
    if tickers.iter().all(|t| t.trim().is_empty()) {
        return Err(ConfigError::NoTickers);
    }
    Ok(())
}

pub(crate) fn check_range(start: NaiveDate, end: NaiveDate) -> Result<(), ConfigError> {
    if end < start {
        return Err(ConfigError::DateRange { start, end });
    }
    Ok(())
}

pub(crate) fn check_runner(runner: &RunnerConfig, pool: &PoolConfig) -> Result<(), ConfigError> {
    if runner.max_consecutive_failures == 0 {
        return Err(ConfigError::ZeroFailureThreshold);
    }
    if runner.selection == SelectionPolicy::TopK(0) {
        return Err(ConfigError::ZeroTopK);
    }
    if pool.max_workers == 0 {
        return Err(ConfigError::ZeroWorkers);
    }
    Ok(())
}

pub(crate) fn check_policy_names<'a>(
    names: impl IntoIterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    let mut any = false;
    for name in names {
        any = true;
        if !seen.insert(name) {
            return Err(ConfigError::DuplicatePolicy(name.to_string()));
        }
    }
    if !any {
        return Err(ConfigError::NoPolicies);
    }
    Ok(())
}

fn build_policies(configs: &[ExitPolicyConfig]) -> Result<Vec<Arc<dyn ExitPolicy>>, ConfigError> {
    check_policy_names(configs.iter().map(|p| p.name.as_str()))?;
    configs.iter().map(ExitPolicyConfig::to_policy).collect()
}

fn content_hash<T: Serialize>(value: &T) -> Result<String, ConfigError> {
    let json = serde_json::to_vec(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    Ok(blake3::hash(&json).to_hex().to_string())
}

fn read_to_string(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

// ─── Single run ──────────────────────────────────────────────────────

/// One backtest over a ticker set and date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub tickers: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default = "default_timeframe")]
    pub timeframe: Timeframe,
    pub detector: BuiltinDetector,
    #[serde(default)]
    pub filter: FilterConfig,
    pub exit_policies: Vec<ExitPolicyConfig>,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub ranking: RankingMetric,
}

impl RunConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml(&read_to_string(path)?)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Content hash of the config: identical configs share a run id.
    pub fn run_id(&self) -> Result<String, ConfigError> {
        content_hash(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_tickers(&self.tickers)?;
        check_range(self.start, self.end)?;
        self.filter.validate()?;
        self.detector.validate().map_err(ConfigError::Detector)?;
        check_runner(&self.runner, &self.pool)?;
        build_policies(&self.exit_policies).map(|_| ())
    }

    /// Validate and resolve into an in-process request.
    pub fn to_request(&self) -> Result<RunRequest, ConfigError> {
        self.validate()?;
        Ok(RunRequest {
            tickers: self.tickers.clone(),
            start: self.start,
            end: self.end,
            timeframe: self.timeframe,
            filter: self.filter.clone(),
            policies: build_policies(&self.exit_policies)?,
            runner: self.runner.clone(),
            pool: self.pool.clone(),
            metrics: self.metrics.clone(),
            ranking: self.ranking,
        })
    }
}

// ─── Walk-forward ────────────────────────────────────────────────────

/// A walk-forward plan as written in a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardFileConfig {
    #[serde(default)]
    pub description: String,
    pub tickers: Vec<String>,
    #[serde(default = "default_timeframe")]
    pub timeframe: Timeframe,
    pub detector: BuiltinDetector,
    pub train: DateWindow,
    pub tests: Vec<DateWindow>,
    #[serde(default)]
    pub filter: FilterConfig,
    pub exit_policies: Vec<ExitPolicyConfig>,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub ranking: RankingMetric,
}

impl WalkForwardFileConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml(&read_to_string(path)?)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn run_id(&self) -> Result<String, ConfigError> {
        content_hash(self)
    }

    pub fn synthesizer(&self) -> BuiltinSynthesizer {
        BuiltinSynthesizer::new(self.detector.clone())
    }

    /// Validate and resolve into a plan. The detector itself is resolved
    /// later, by the synthesizer, on the training window.
    pub fn to_plan(&self) -> Result<WalkForwardPlan, ConfigError> {
        self.detector.validate().map_err(ConfigError::Detector)?;
        let plan = WalkForwardPlan {
            description: self.description.clone(),
            tickers: self.tickers.clone(),
            timeframe: self.timeframe,
            train: self.train,
            tests: self.tests.clone(),
            filter: self.filter.clone(),
            policies: build_policies(&self.exit_policies)?,
            runner: self.runner.clone(),
            pool: self.pool.clone(),
            metrics: self.metrics.clone(),
            ranking: self.ranking,
        };
        plan.validate()?;
        Ok(plan)
    }
}
