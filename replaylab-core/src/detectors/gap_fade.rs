//! Gap-up VWAP fade: short when a stock that gapped up loses session VWAP.

use std::collections::BTreeMap;

use super::vwap_cross_step;
use super::vwap_reclaim::VwapCrossParams;
use crate::detect::{Accumulator, Detection, Detector, DetectorError};
use crate::domain::Direction;
use crate::replay::ReplayCursor;

#[derive(Debug, Clone)]
pub struct GapUpVwapFade {
    params: VwapCrossParams,
}

impl GapUpVwapFade {
    pub fn new(params: VwapCrossParams) -> Self {
        Self { params }
    }
}

impl Detector for GapUpVwapFade {
    fn name(&self) -> &str {
        "gap_up_vwap_fade"
    }

    fn params(&self) -> BTreeMap<String, f64> {
        self.params.to_map()
    }

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
            1.0,
            Direction::Short,
        ))
    }
}
