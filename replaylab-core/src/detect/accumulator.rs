//! Per-unit running state handed to a detector on every step.
//!
//! Detectors are shared across threads and must not keep mutable state of
//! their own. Anything that accumulates over a session (VWAP, opening range,
//! cross counts) lives here instead: the runner creates one `Accumulator` per
//! ticker-day, passes it into each `detect` call and drops it when the day
//! ends.

use std::collections::BTreeMap;

use crate::domain::Bar;

/// Session VWAP from typical price × volume.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningVwap {
    cum_pv: f64,
    cum_volume: f64,
}

impl RunningVwap {
    pub fn update(&mut self, bar: &Bar) {
        let v = bar.volume as f64;
        self.cum_pv += bar.typical_price() * v;
        self.cum_volume += v;
    }

    /// `None` until some volume has traded.
    pub fn value(&self) -> Option<f64> {
        (self.cum_volume > 0.0).then(|| self.cum_pv / self.cum_volume)
    }

    pub fn cumulative_volume(&self) -> f64 {
        self.cum_volume
    }
}

#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    vwap: RunningVwap,
    /// Index of the last bar folded into `vwap`, so double updates are no-ops.
    vwap_through: Option<usize>,
    slots: BTreeMap<String, f64>,
    flags: BTreeMap<String, bool>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `bar` (at day index `index`) into the running VWAP exactly once.
    pub fn observe_vwap(&mut self, index: usize, bar: &Bar) -> Option<f64> {
        if self.vwap_through.map_or(true, |last| index > last) {
            self.vwap.update(bar);
            self.vwap_through = Some(index);
        }
        self.vwap.value()
    }

    pub fn vwap(&self) -> &RunningVwap {
        &self.vwap
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.slots.get(key).copied()
    }

    pub fn set(&mut self, key: &str, value: f64) {
        self.slots.insert(key.to_string(), value);
    }

    /// Add `delta` to a slot (starting from zero) and return the new value.
    pub fn add(&mut self, key: &str, delta: f64) -> f64 {
        let slot = self.slots.entry(key.to_string()).or_insert(0.0);
        *slot += delta;
        *slot
    }

    /// Keep the larger of the stored value and `value`.
    pub fn max(&mut self, key: &str, value: f64) -> f64 {
        let slot = self.slots.entry(key.to_string()).or_insert(value);
        if value > *slot {
            *slot = value;
        }
        *slot
    }

    /// Keep the smaller of the stored value and `value`.
    pub fn min(&mut self, key: &str, value: f64) -> f64 {
        let slot = self.slots.entry(key.to_string()).or_insert(value);
        if value < *slot {
            *slot = value;
        }
        *slot
    }

    pub fn flag(&self, key: &str) -> bool {
        self.flags.get(key).copied().unwrap_or(false)
    }

    pub fn set_flag(&mut self, key: &str, value: bool) {
        self.flags.insert(key.to_string(), value);
    }
}
