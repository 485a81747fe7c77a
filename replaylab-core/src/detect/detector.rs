//! Detector contract.
//!
//! A detector is a resolved, versioned detection function. It receives only a
//! `ReplayCursor` and the unit's `Accumulator`, never a bar array, so it can see
//! bars `[0..=i]` of the current ticker-day and nothing else.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::accumulator::Accumulator;
use crate::domain::Direction;
use crate::fingerprint::DetectorIdentity;
use crate::replay::ReplayCursor;

/// What a detector reports when it fires.
///
/// Deliberately carries no ticker, date or time: the runner stamps those from
/// the cursor so a detection cannot be attributed to a bar it has not reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub direction: Direction,
    /// Conviction, 0..=100.
    pub strength: f64,
    pub metrics: BTreeMap<String, f64>,
}

impl Detection {
    pub fn new(direction: Direction, strength: f64) -> Self {
        Self {
            direction,
            strength,
            metrics: BTreeMap::new(),
        }
    }

    pub fn long(strength: f64) -> Self {
        Self::new(Direction::Long, strength)
    }

    pub fn short(strength: f64) -> Self {
        Self::new(Direction::Short, strength)
    }

    pub fn with_metric(mut self, key: &str, value: f64) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }

    /// Reject detections that break the contract: strength must be finite and
    /// within 0..=100, metric values must be finite.
    pub fn check_contract(&self) -> Result<(), DetectorError> {
        if !self.strength.is_finite() || !(0.0..=100.0).contains(&self.strength) {
            return Err(DetectorError::Contract(format!(
                "strength {} outside 0..=100",
                self.strength
            )));
        }
        if let Some((k, v)) = self.metrics.iter().find(|(_, v)| !v.is_finite()) {
            return Err(DetectorError::Contract(format!(
                "metric '{k}' is not finite ({v})"
            )));
        }
        Ok(())
    }
}

/// Step-level detector failure.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum DetectorError {
    #[error("detector failed: {0}")]
    Failed(String),
    #[error("detector contract violation: {0}")]
    Contract(String),
    #[error("detector panicked: {0}")]
    Panicked(String),
}

/// Trait for detection functions.
///
/// # Contract
/// - `detect` is called once per replay step, starting at bar index
///   `warmup_bars()`.
/// - State that spans steps lives in the `Accumulator`, never in `self`.
///   Implementations are shared across worker threads.
/// - An `Err` counts as "no signal this step"; repeated errors abort the
///   ticker-day.
pub trait Detector: Send + Sync {
    /// Human-readable name (e.g., "opening_range_breakout").
    fn name(&self) -> &str;

    /// Version of the detection logic. Bump it whenever behaviour changes.
    fn version(&self) -> &str {
        "1"
    }

    /// Parameter values, part of the detector's identity.
    fn params(&self) -> BTreeMap<String, f64> {
        BTreeMap::new()
    }

    /// Number of bars to replay before the first `detect` call.
    fn warmup_bars(&self) -> usize;

    /// Evaluate the current replay step.
    fn detect(
        &self,
        cursor: &ReplayCursor<'_>,
        acc: &mut Accumulator,
    ) -> Result<Option<Detection>, DetectorError>;

    /// Audit identity: name, version and a fingerprint over the parameters.
    fn identity(&self) -> DetectorIdentity {
        DetectorIdentity::of(self.name(), self.version(), &self.params())
    }
}
