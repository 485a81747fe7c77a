//! Execution: exit policies and the evaluator that realizes signals into trades.
//!
//! A policy never receives the post-entry bar array. The evaluator opens a
//! `PositionTracker` per (signal, policy) and feeds it one bar at a time from a
//! `ReplayCursor`, starting with the entry bar. Trackers are private to their
//! position; policies share nothing with each other.

pub mod evaluator;
pub mod rules;

pub use evaluator::{
    ExecutionEvaluator, ExecutionOutcome, PolicyFailure, PolicyRun, SkipReason, SkippedSignal,
    ValidationIssue,
};
pub use rules::{ExitRules, RulePolicy};

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Bar, Direction, ExitReason};

/// A filled entry, as seen by a policy when its position opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub ticker: String,
    pub date: NaiveDate,
    pub direction: Direction,
    pub signal_time: NaiveTime,
    pub entry_bar: usize,
    pub entry_time: NaiveTime,
    /// Open of the bar after the signal bar.
    pub entry_price: f64,
}

/// A tracker's answer for one bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitDecision {
    Hold,
    Exit { price: f64, reason: ExitReason },
}

#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum PolicyError {
    #[error("exit policy '{policy}' failed: {reason}")]
    Failed { policy: String, reason: String },

    #[error("exit policy '{policy}' panicked: {reason}")]
    Panicked { policy: String, reason: String },

    #[error("exit policy '{policy}' exited at {price} outside bar range {low}..{high}")]
    ExitOutsideBar {
        policy: String,
        price: f64,
        low: f64,
        high: f64,
    },

    #[error("duplicate exit policy name '{0}'")]
    DuplicateName(String),

    #[error("invalid exit rules for '{policy}': {reason}")]
    InvalidRules { policy: String, reason: String },
}

/// Per-position state machine created by an `ExitPolicy`.
pub trait PositionTracker: Send {
    /// Observe the next bar. `bars_held` is the bar's offset from the entry
    /// bar (0 on the entry bar itself).
    fn on_bar(&mut self, bar: &Bar, bars_held: usize) -> Result<ExitDecision, PolicyError>;
}

/// A named, deterministic exit rule set.
pub trait ExitPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Open a tracker for one position.
    fn start(&self, entry: &Entry) -> Result<Box<dyn PositionTracker>, PolicyError>;
}
