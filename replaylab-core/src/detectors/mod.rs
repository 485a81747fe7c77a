//! Built-in detector families.
//!
//! Each detector takes a typed parameter struct. `BuiltinDetector` is the
//! tagged form used in configuration files:
//!
//! ```toml
//! [detector]
//! name = "gap_down_vwap_reclaim"
//! min_gap_pct = 3.0
//! ```

pub mod gap_fade;
pub mod opening_range;
pub mod vwap_reclaim;

pub use gap_fade::GapUpVwapFade;
pub use opening_range::{OpeningRangeBreakout, OrbParams};
pub use vwap_reclaim::{GapDownVwapReclaim, VwapCrossParams};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::detect::{Accumulator, Detection, Detector};
use crate::domain::{Bar, Direction};
use crate::replay::ReplayCursor;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum BuiltinDetector {
    OpeningRangeBreakout(OrbParams),
    GapDownVwapReclaim(VwapCrossParams),
    GapUpVwapFade(VwapCrossParams),
}

impl BuiltinDetector {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpeningRangeBreakout(_) => "opening_range_breakout",
            Self::GapDownVwapReclaim(_) => "gap_down_vwap_reclaim",
            Self::GapUpVwapFade(_) => "gap_up_vwap_fade",
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::OpeningRangeBreakout(p) => p.validate(),
            Self::GapDownVwapReclaim(p) | Self::GapUpVwapFade(p) => p.validate(),
        }
    }

    pub fn build(&self) -> Arc<dyn Detector> {
        match self {
            Self::OpeningRangeBreakout(p) => Arc::new(OpeningRangeBreakout::new(p.clone())),
            Self::GapDownVwapReclaim(p) => Arc::new(GapDownVwapReclaim::new(p.clone())),
            Self::GapUpVwapFade(p) => Arc::new(GapUpVwapFade::new(p.clone())),
        }
    }

    pub fn all_names() -> &'static [&'static str] {
        &[
            "opening_range_breakout",
            "gap_down_vwap_reclaim",
            "gap_up_vwap_fade",
        ]
    }
}

// ── Shared helpers ──

/// Opening gap in percent of the prior session close.
pub(crate) fn gap_percent(first_open: f64, prior_close: f64) -> Option<f64> {
    (prior_close > 0.0).then(|| (first_open - prior_close) / prior_close * 100.0)
}

/// Current bar volume over the mean volume of the bars before it.
pub(crate) fn volume_ratio(window: &[Bar]) -> Option<f64> {
    let (current, before) = window.split_last()?;
    if before.is_empty() {
        return None;
    }
    let avg = before.iter().map(|b| b.volume as f64).sum::<f64>() / before.len() as f64;
    (avg > 0.0).then(|| current.volume as f64 / avg)
}

pub(crate) fn clamp_strength(raw: f64) -> f64 {
    if raw.is_finite() {
        raw.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Shared VWAP-cross step for the two gap families.
///
/// `gap_sign` is -1 for gap-downs and +1 for gap-ups. Every close that crosses
/// VWAP against the gap is a candidate while the crossing count stays within
/// `max_vwap_crosses`; later crosses score lower.
pub(crate) fn vwap_cross_step(
    cursor: &ReplayCursor<'_>,
    acc: &mut Accumulator,
    params: &VwapCrossParams,
    gap_sign: f64,
    direction: Direction,
) -> Option<Detection> {
    let bars = cursor.window(None);
    let (bar, first) = (bars.last()?, bars.first()?);
    let gap = gap_percent(first.open, cursor.prior_close()?)?;
    if gap * gap_sign < params.min_gap_pct {
        return None;
    }

    let vwap = acc.vwap().value()?;
    // +1 above VWAP, -1 at or below.
    let side = if bar.close > vwap { 1.0 } else { -1.0 };
    let prev_side = acc.get("vwap_side");
    acc.set("vwap_side", side);
    let crossed = prev_side.is_some_and(|p| p != side);
    if crossed {
        acc.add("vwap_crosses", 1.0);
    }

    // Reclaim after a gap-down is a move to +1; fade after a gap-up to -1.
    let wanted_side = -gap_sign;
    if !crossed || side != wanted_side {
        return None;
    }
    let crosses = acc.get("vwap_crosses").unwrap_or(0.0);
    if crosses > params.max_vwap_crosses as f64 {
        return None;
    }
    let ratio = volume_ratio(cursor.window(Some(params.volume_lookback)))?;
    if ratio < params.min_volume_ratio {
        return None;
    }

    let strength = clamp_strength(
        40.0 + gap.abs().min(20.0) * 1.5 + ratio.min(5.0) * 4.0 - (crosses - 1.0).max(0.0) * 5.0,
    );
    Some(
        Detection::new(direction, strength)
            .with_metric("gap_percent", gap)
            .with_metric("vwap", vwap)
            .with_metric("vwap_crosses", crosses)
            .with_metric("volume_ratio", ratio),
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::NaiveDate;

    use crate::domain::Bar;
    use crate::replay::TickerDay;

    pub fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 13).unwrap()
    }

    /// Five-minute bars from `(open, high, low, close, volume)` tuples.
    pub fn day(prior_close: Option<f64>, ohlcv: &[(f64, f64, f64, f64, u64)]) -> TickerDay {
        let bars = ohlcv
            .iter()
            .enumerate()
            .map(|(i, &(o, h, l, c, v))| {
                let ts = date().and_hms_opt(9, 30, 0).unwrap()
                    + chrono::Duration::minutes(5 * i as i64);
                Bar::new(ts, o, h, l, c, v)
            })
            .collect();
        TickerDay::new("APLX", date(), bars, prior_close).unwrap()
    }
}
