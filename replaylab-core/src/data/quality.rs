//! Data-quality checks for one ticker-day.
//!
//! Detectors that scan thin or broken sessions tend to produce either nothing
//! or garbage. The report travels with the unit outcome so a run can tell
//! "no signal" apart from "barely any data".

use serde::{Deserialize, Serialize};

use super::store::Timeframe;
use super::synthetic::{session_open, SESSION_MINUTES};
use crate::domain::Bar;

/// Minimum share of the expected regular-session bars before a day is flagged
/// as incomplete.
pub const MIN_SESSION_COVERAGE: f64 = 0.8;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataQualityReport {
    pub bars_scanned: usize,
    pub expected_bars: usize,
    pub insane_bars: usize,
    pub warnings: Vec<String>,
}

impl DataQualityReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Inspect a ticker-day's bars.
pub fn assess(bars: &[Bar], timeframe: Timeframe) -> DataQualityReport {
    let step = timeframe.minutes().min(SESSION_MINUTES);
    let expected_bars = (SESSION_MINUTES / step).max(1) as usize;
    let insane_bars = bars.iter().filter(|b| !b.is_sane()).count();

    let mut warnings = Vec::new();

    if insane_bars > 0 {
        warnings.push(format!("{insane_bars} bar(s) fail OHLC sanity checks"));
    }

    let coverage = bars.len() as f64 / expected_bars as f64;
    if !bars.is_empty() && coverage < MIN_SESSION_COVERAGE {
        warnings.push(format!(
            "incomplete session: {} of {} expected bars ({:.0}%)",
            bars.len(),
            expected_bars,
            coverage * 100.0
        ));
    }

    if let Some(first) = bars.first() {
        if timeframe != Timeframe::OneDay && first.time_of_day() > session_open() {
            warnings.push(format!(
                "first bar at {} is after the session open",
                first.time_of_day()
            ));
        }
    }

    if bars.iter().any(|b| b.volume == 0) {
        warnings.push("zero-volume bars present".into());
    }

    DataQualityReport {
        bars_scanned: bars.len(),
        expected_bars,
        insane_bars,
        warnings,
    }
}
