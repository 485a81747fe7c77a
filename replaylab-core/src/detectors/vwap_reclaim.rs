//! Gap-down VWAP reclaim: long when a stock that gapped down closes back
//! above session VWAP on expanding volume.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::vwap_cross_step;
use crate::detect::{Accumulator, Detection, Detector, DetectorError};
use crate::domain::Direction;
use crate::replay::ReplayCursor;

/// Parameters shared by the VWAP-cross families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VwapCrossParams {
    /// Minimum opening gap magnitude, percent of prior close.
    pub min_gap_pct: f64,
    /// Cross-bar volume over the trailing average.
    pub min_volume_ratio: f64,
    /// Candidates stop once VWAP has been crossed more often than this.
    pub max_vwap_crosses: u32,
    pub volume_lookback: usize,
}

impl Default for VwapCrossParams {
    fn default() -> Self {
        Self {
            min_gap_pct: 2.0,
            min_volume_ratio: 1.2,
            max_vwap_crosses: 3,
            volume_lookback: 12,
        }
    }
}

impl VwapCrossParams {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.min_gap_pct.is_finite() && self.min_gap_pct > 0.0) {
            return Err(format!("min_gap_pct must be > 0, got {}", self.min_gap_pct));
        }
        if !(self.min_volume_ratio.is_finite() && self.min_volume_ratio >= 0.0) {
            return Err(format!(
                "min_volume_ratio must be >= 0, got {}",
                self.min_volume_ratio
            ));
        }
        if self.max_vwap_crosses == 0 {
            return Err("max_vwap_crosses must be >= 1".into());
        }
        if self.volume_lookback == 0 {
            return Err("volume_lookback must be >= 1".into());
        }
        Ok(())
    }

    pub(crate) fn to_map(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("min_gap_pct".to_string(), self.min_gap_pct),
            ("min_volume_ratio".to_string(), self.min_volume_ratio),
            ("max_vwap_crosses".to_string(), self.max_vwap_crosses as f64),
            ("volume_lookback".to_string(), self.volume_lookback as f64),
        ])
    }
}

#[derive(Debug, Clone)]
pub struct GapDownVwapReclaim {
    params: VwapCrossParams,
}

impl GapDownVwapReclaim {
    pub fn new(params: VwapCrossParams) -> Self {
        Self { params }
    }
}

impl Detector for GapDownVwapReclaim {
    fn name(&self) -> &str {
        "gap_down_vwap_reclaim"
    }

    fn params(&self) -> BTreeMap<String, f64> {
        self.params.to_map()
    }

    // Bar 0 establishes which side of VWAP the session opened on.
    fn warmup_bars(&self) -> usize {
        0
    }

    fn detect(
        &self,
        cursor: &ReplayCursor<'_>,
        acc: &mut Accumulator,
    ) -> Result<Option<Detection>, DetectorError> {
        Ok(vwap_cross_step(
            cursor,
            acc,
            &self.params,
            -1.0,
            Direction::Long,
        ))
    }
}
