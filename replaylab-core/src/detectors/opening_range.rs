//! Opening range breakout: long when a close breaks above the high of the
//! first `range_bars` bars of the session.
//!
//! Fires on the bar that crosses the range high (previous close at or below
//! it), not on every bar that happens to sit above it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{clamp_strength, volume_ratio};
use crate::detect::{Accumulator, Detection, Detector, DetectorError};
use crate::replay::ReplayCursor;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbParams {
    /// Bars forming the opening range (6 × 5m = first 30 minutes).
    pub range_bars: usize,
    /// Close must clear the range high by this many percent.
    pub min_breakout_pct: f64,
    pub min_volume_ratio: f64,
    pub volume_lookback: usize,
    /// No breakouts after this bar index.
    pub last_entry_bar: usize,
}

impl Default for OrbParams {
    fn default() -> Self {
        Self {
            range_bars: 6,
            min_breakout_pct: 0.0,
            min_volume_ratio: 1.0,
            volume_lookback: 12,
            last_entry_bar: 36,
        }
    }
}

impl OrbParams {
    pub fn validate(&self) -> Result<(), String> {
        if self.range_bars == 0 {
            return Err("range_bars must be >= 1".into());
        }
        if !(self.min_breakout_pct.is_finite() && self.min_breakout_pct >= 0.0) {
            return Err(format!(
                "min_breakout_pct must be >= 0, got {}",
                self.min_breakout_pct
            ));
        }
        if !(self.min_volume_ratio.is_finite() && self.min_volume_ratio >= 0.0) {
            return Err(format!(
                "min_volume_ratio must be >= 0, got {}",
                self.min_volume_ratio
            ));
        }
        if self.volume_lookback == 0 {
            return Err("volume_lookback must be >= 1".into());
        }
        if self.last_entry_bar < self.range_bars {
            return Err(format!(
                "last_entry_bar ({}) is inside the opening range ({} bars)",
                self.last_entry_bar, self.range_bars
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct OpeningRangeBreakout {
    params: OrbParams,
}

impl OpeningRangeBreakout {
    pub fn new(params: OrbParams) -> Self {
        Self { params }
    }
}

impl Detector for OpeningRangeBreakout {
    fn name(&self) -> &str {
        "opening_range_breakout"
    }

    fn params(&self) -> BTreeMap<String, f64> {
        let p = &self.params;
        BTreeMap::from([
            ("range_bars".to_string(), p.range_bars as f64),
            ("min_breakout_pct".to_string(), p.min_breakout_pct),
            ("min_volume_ratio".to_string(), p.min_volume_ratio),
            ("volume_lookback".to_string(), p.volume_lookback as f64),
            ("last_entry_bar".to_string(), p.last_entry_bar as f64),
        ])
    }

    fn warmup_bars(&self) -> usize {
        self.params.range_bars
    }

    fn detect(
        &self,
        cursor: &ReplayCursor<'_>,
        acc: &mut Accumulator,
    ) -> Result<Option<Detection>, DetectorError> {
        let p = &self.params;
        let Some(i) = cursor.index() else {
            return Ok(None);
        };
        if i < p.range_bars || i > p.last_entry_bar {
            return Ok(None);
        }

        let bars = cursor.window(None);
        let bar = &bars[i];
        if !bar.is_sane() {
            return Err(DetectorError::Failed(format!(
                "bar {i} at {} fails OHLC sanity",
                bar.timestamp
            )));
        }

        let (or_high, or_low) = match (acc.get("or_high"), acc.get("or_low")) {
            (Some(h), Some(l)) => (h, l),
            _ => {
                let range = &bars[..p.range_bars];
                let h = range.iter().map(|b| b.high).fold(f64::MIN, f64::max);
                let l = range.iter().map(|b| b.low).fold(f64::MAX, f64::min);
                acc.set("or_high", h);
                acc.set("or_low", l);
                (h, l)
            }
        };

        let prev_close = bars[i - 1].close;
        let trigger = or_high * (1.0 + p.min_breakout_pct / 100.0);
        if !(prev_close <= trigger && bar.close > trigger) {
            return Ok(None);
        }

        let ratio = volume_ratio(cursor.window(Some(p.volume_lookback))).unwrap_or(1.0);
        if ratio < p.min_volume_ratio {
            return Ok(None);
        }

        let breakout_pct = (bar.close - or_high) / or_high * 100.0;
        let range_pct = if or_low > 0.0 {
            (or_high - or_low) / or_low * 100.0
        } else {
            0.0
        };
        // Later breakouts decay: a cross at the last entry bar loses 15 points.
        let lateness = (i - p.range_bars) as f64 / (p.last_entry_bar - p.range_bars).max(1) as f64;
        let strength = clamp_strength(
            50.0 + (breakout_pct * 10.0).min(20.0) + ratio.min(5.0) * 5.0 - lateness * 15.0,
        );

        Ok(Some(
            Detection::long(strength)
                .with_metric("or_high", or_high)
                .with_metric("or_low", or_low)
                .with_metric("range_pct", range_pct)
                .with_metric("breakout_pct", breakout_pct)
                .with_metric("volume_ratio", ratio),
        ))
    }
}
