//! Replay cursor: the only way detectors and exit policies see bars.
//!
//! # Invariant
//! No accessor on `ReplayCursor` returns a bar with a timestamp later than the
//! bar at the current index `i`. The cursor only moves forward, one bar per
//! `advance()`, and never past the end of its ticker-day.
//!
//! Isolation here is logical (slicing one in-memory array), so every accessor
//! re-checks the invariant in debug builds rather than trusting the slicing
//! arithmetic.

use chrono::NaiveDate;

use super::ticker_day::TickerDay;
use crate::domain::Bar;

/// Not `Clone`: a detector holding `&ReplayCursor` cannot fork and advance a
/// private copy.
#[derive(Debug)]
pub struct ReplayCursor<'a> {
    day: &'a TickerDay,
    /// `None` before the first `advance()`.
    position: Option<usize>,
}

impl<'a> ReplayCursor<'a> {
    /// A cursor positioned before the first bar of `day`.
    pub fn new(day: &'a TickerDay) -> Self {
        Self {
            day,
            position: None,
        }
    }

    /// Move to the next bar. Returns false (and stays put) at day end.
    pub fn advance(&mut self) -> bool {
        let next = self.position.map_or(0, |i| i + 1);
        if next < self.day.len() {
            self.position = Some(next);
            true
        } else {
            false
        }
    }

    /// Advance one bar at a time until the cursor sits on `index`.
    ///
    /// Returns false if `index` is behind the cursor or beyond the day.
    pub fn advance_to(&mut self, index: usize) -> bool {
        if index >= self.day.len() || self.position.is_some_and(|i| i > index) {
            return false;
        }
        while self.position != Some(index) {
            if !self.advance() {
                return false;
            }
        }
        true
    }

    /// Current bar index, `None` before the first advance.
    pub fn index(&self) -> Option<usize> {
        self.position
    }

    /// Number of bars exposed so far (`i + 1`).
    pub fn bars_seen(&self) -> usize {
        self.position.map_or(0, |i| i + 1)
    }

    /// The bar at the current index.
    ///
    /// Borrows from the ticker-day rather than the cursor, so the bar stays
    /// usable after a later `advance()`. It is still never ahead of the
    /// position it was read at.
    pub fn latest(&self) -> Option<&'a Bar> {
        let i = self.position?;
        let day: &'a TickerDay = self.day;
        let bar = &day.bars()[i];
        self.debug_check(std::slice::from_ref(bar));
        Some(bar)
    }

    /// Bars `[max(0, i - lookback) ..= i]`; `None` means everything up to `i`.
    ///
    /// Empty before the first advance.
    pub fn window(&self, lookback: Option<usize>) -> &'a [Bar] {
        let Some(i) = self.position else {
            return &[];
        };
        let start = lookback.map_or(0, |n| i.saturating_sub(n));
        let day: &'a TickerDay = self.day;
        let slice = &day.bars()[start..=i];
        self.debug_check(slice);
        slice
    }

    /// Close of the previous session. Always strictly in the past.
    pub fn prior_close(&self) -> Option<f64> {
        self.day.prior_close()
    }

    pub fn ticker(&self) -> &str {
        self.day.ticker()
    }

    pub fn date(&self) -> NaiveDate {
        self.day.date()
    }

    /// Debug-build re-verification of the exposure invariant.
    fn debug_check(&self, exposed: &[Bar]) {
        if cfg!(debug_assertions) {
            if let (Some(i), Some(last)) = (self.position, exposed.last()) {
                let current = &self.day.bars()[i];
                debug_assert!(
                    exposed.iter().all(|b| b.timestamp <= current.timestamp),
                    "cursor exposed a bar after {}",
                    current.timestamp
                );
                debug_assert_eq!(last.timestamp, current.timestamp);
            }
        }
    }
}
