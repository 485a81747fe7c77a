//! Failure report: unit-level and policy-level failures collected alongside
//! successful results. Nothing in here aborts a run.

use serde::{Deserialize, Serialize};

use replaylab_core::detect::{UnitOutcome, UnitStatus};
use replaylab_core::domain::UnitKey;
use replaylab_core::execution::{PolicyFailure, SkippedSignal};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitFailureKind {
    DataUnavailable { reason: String },
    DetectorFailure { step: usize, errors: Vec<String> },
    Timeout { step: usize, elapsed_ms: u64 },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub unit: UnitKey,
    #[serde(flatten)]
    pub kind: UnitFailureKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub units: Vec<UnitFailure>,
    pub policies: Vec<PolicyFailure>,
    pub skipped_signals: Vec<SkippedSignal>,
}

impl FailureReport {
    /// Collect the non-completed units, in unit order.
    pub fn from_outcomes(outcomes: &[UnitOutcome]) -> Self {
        let units = outcomes
            .iter()
            .filter_map(|o| {
                let kind = match &o.status {
                    UnitStatus::Completed => return None,
                    UnitStatus::DataUnavailable { reason } => UnitFailureKind::DataUnavailable {
                        reason: reason.clone(),
                    },
                    UnitStatus::DetectorFailed { step, errors } => {
                        UnitFailureKind::DetectorFailure {
                            step: *step,
                            errors: errors.clone(),
                        }
                    }
                    UnitStatus::TimedOut { step, elapsed_ms } => UnitFailureKind::Timeout {
                        step: *step,
                        elapsed_ms: *elapsed_ms,
                    },
                    UnitStatus::Cancelled => UnitFailureKind::Cancelled,
                };
                Some(UnitFailure {
                    unit: o.key.clone(),
                    kind,
                })
            })
            .collect();
        Self {
            units,
            ..Self::default()
        }
    }

    pub fn count(&self, pred: impl Fn(&UnitFailureKind) -> bool) -> usize {
        self.units.iter().filter(|u| pred(&u.kind)).count()
    }

    pub fn data_unavailable(&self) -> usize {
        self.count(|k| matches!(k, UnitFailureKind::DataUnavailable { .. }))
    }

    pub fn detector_failures(&self) -> usize {
        self.count(|k| matches!(k, UnitFailureKind::DetectorFailure { .. }))
    }

    pub fn timeouts(&self) -> usize {
        self.count(|k| matches!(k, UnitFailureKind::Timeout { .. }))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|k| matches!(k, UnitFailureKind::Cancelled))
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty() && self.policies.is_empty() && self.skipped_signals.is_empty()
    }

    /// Fold another report in, e.g. one per walk-forward window.
    pub fn extend(&mut self, other: FailureReport) {
        self.units.extend(other.units);
        self.policies.extend(other.policies);
        self.skipped_signals.extend(other.skipped_signals);
    }
}
