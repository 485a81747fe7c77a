//! Strategy Synthesis boundary.
//!
//! Synthesis turns a strategy description into a resolved `Detector`. The
//! engine never inspects how that happens; it only calls `synthesize` once per
//! walk-forward plan and holds the returned `Arc` for every test window.
//!
//! Synthesizers read bars through `TrainingBars`, a store view clipped to the
//! training window, so a fit can never see test-window data.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use super::detector::Detector;
use crate::data::{BarStore, StoreError, Timeframe};
use crate::detectors::BuiltinDetector;
use crate::domain::Bar;

/// What the synthesizer is given: the training window and universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub description: String,
    pub tickers: Vec<String>,
    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    pub timeframe: Timeframe,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SynthesisError {
    #[error("synthesizer '{synthesizer}' rejected the request: {reason}")]
    Rejected { synthesizer: String, reason: String },

    #[error("invalid parameters for detector '{detector}': {reason}")]
    InvalidParams { detector: String, reason: String },
}

impl SynthesisRequest {
    pub fn in_training_window(&self, date: NaiveDate) -> bool {
        self.train_start <= date && date <= self.train_end
    }
}

/// A bar store seen through the training window. Dates outside
/// `[train_start, train_end]` read as empty.
pub struct TrainingBars<'a> {
    store: &'a dyn BarStore,
    name: String,
    train_start: NaiveDate,
    train_end: NaiveDate,
}

impl<'a> TrainingBars<'a> {
    pub fn new(store: &'a dyn BarStore, request: &SynthesisRequest) -> Self {
        Self {
            store,
            name: format!("{} (training {}..{})", store.name(), request.train_start, request.train_end),
            train_start: request.train_start,
            train_end: request.train_end,
        }
    }
}

impl BarStore for TrainingBars<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_bars(
        &self,
        ticker: &str,
        date: NaiveDate,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, StoreError> {
        if date < self.train_start || date > self.train_end {
            return Ok(Vec::new());
        }
        self.store.get_bars(ticker, date, timeframe)
    }

    fn is_available(&self) -> bool {
        self.store.is_available()
    }
}

pub trait StrategySynthesizer: Send + Sync {
    fn name(&self) -> &str;

    /// Resolve a detector, optionally fitting it on `training` bars.
    fn synthesize(
        &self,
        request: &SynthesisRequest,
        training: &TrainingBars<'_>,
    ) -> Result<Arc<dyn Detector>, SynthesisError>;
}

/// Hands back a detector that was resolved elsewhere.
pub struct FixedSynthesizer {
    detector: Arc<dyn Detector>,
}

impl FixedSynthesizer {
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self { detector }
    }
}

impl StrategySynthesizer for FixedSynthesizer {
    fn name(&self) -> &str {
        "fixed"
    }

    fn synthesize(
        &self,
        _request: &SynthesisRequest,
        _training: &TrainingBars<'_>,
    ) -> Result<Arc<dyn Detector>, SynthesisError> {
        Ok(Arc::clone(&self.detector))
    }
}

/// Resolves one of the built-in detector families from typed parameters.
#[derive(Debug, Clone)]
pub struct BuiltinSynthesizer {
    builtin: BuiltinDetector,
}

impl BuiltinSynthesizer {
    pub fn new(builtin: BuiltinDetector) -> Self {
        Self { builtin }
    }
}

impl StrategySynthesizer for BuiltinSynthesizer {
    fn name(&self) -> &str {
        "builtin"
    }

    /// Parameters are fixed by configuration; training bars are not read.
    fn synthesize(
        &self,
        request: &SynthesisRequest,
        _training: &TrainingBars<'_>,
    ) -> Result<Arc<dyn Detector>, SynthesisError> {
        if request.train_end < request.train_start {
            return Err(SynthesisError::Rejected {
                synthesizer: self.name().into(),
                reason: format!(
                    "training window ends ({}) before it starts ({})",
                    request.train_end, request.train_start
                ),
            });
        }
        self.builtin
            .validate()
            .map_err(|reason| SynthesisError::InvalidParams {
                detector: self.builtin.name().into(),
                reason,
            })?;
        Ok(self.builtin.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemoryBarStore;
    use crate::detectors::OrbParams;

    fn request() -> SynthesisRequest {
        SynthesisRequest {
            description: "opening range breakout on volume".into(),
            tickers: vec!["SPY".into()],
            train_start: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
            train_end: NaiveDate::from_ymd_opt(2025, 9, 30).unwrap(),
            timeframe: Timeframe::FiveMinutes,
        }
    }

    fn day_bars(date: NaiveDate) -> Vec<Bar> {
        (0..3)
            .map(|i| {
                let ts = date.and_hms_opt(9, 30 + 5 * i, 0).unwrap();
                Bar::new(ts, 10.0, 10.5, 9.5, 10.2, 1_000)
            })
            .collect()
    }

    #[test]
    fn training_view_hides_dates_outside_the_window() {
        let d = |m: u32, day: u32| NaiveDate::from_ymd_opt(2025, m, day).unwrap();
        let mut store = MemoryBarStore::new();
        for date in [d(8, 29), d(9, 15), d(9, 30), d(10, 1)] {
            store.insert("SPY", Timeframe::FiveMinutes, day_bars(date));
        }
        let view = TrainingBars::new(&store, &request());
        let tf = Timeframe::FiveMinutes;

        assert_eq!(view.get_bars("SPY", d(9, 15), tf).unwrap().len(), 3);
        assert_eq!(view.get_bars("SPY", d(9, 30), tf).unwrap().len(), 3);
        assert!(view.get_bars("SPY", d(10, 1), tf).unwrap().is_empty());
        assert!(view.get_bars("SPY", d(8, 29), tf).unwrap().is_empty());
        // The session before the window is clipped too.
        assert_eq!(view.prior_close("SPY", d(9, 1), tf).unwrap(), None);
        assert!(view.name().contains("training 2025-09-01..2025-09-30"));
        assert!(request().in_training_window(d(9, 30)));
        assert!(!request().in_training_window(d(10, 1)));
    }

    #[test]
    fn builtin_resolves_by_name() {
        let store = MemoryBarStore::new();
        let s = BuiltinSynthesizer::new(BuiltinDetector::OpeningRangeBreakout(OrbParams::default()));
        let d = s
            .synthesize(&request(), &TrainingBars::new(&store, &request()))
            .unwrap();
        assert_eq!(d.name(), "opening_range_breakout");
    }

    #[test]
    fn builtin_rejects_bad_params() {
        let params = OrbParams {
            range_bars: 0,
            ..OrbParams::default()
        };
        let s = BuiltinSynthesizer::new(BuiltinDetector::OpeningRangeBreakout(params));
        let store = MemoryBarStore::new();
        let err = s
            .synthesize(&request(), &TrainingBars::new(&store, &request()))
            .err()
            .unwrap();
        assert!(matches!(err, SynthesisError::InvalidParams { .. }));
    }

    #[test]
    fn fixed_returns_same_instance() {
        let d = BuiltinDetector::OpeningRangeBreakout(OrbParams::default()).build();
        let s = FixedSynthesizer::new(Arc::clone(&d));
        let store = MemoryBarStore::new();
        let a = s
            .synthesize(&request(), &TrainingBars::new(&store, &request()))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &d));
    }
}
