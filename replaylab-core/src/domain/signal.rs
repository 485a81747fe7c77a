//! Signal: a detection produced at one replay step.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Directional intent of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short. Multiplies price deltas into PnL.
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

/// A candidate trade signal emitted by a detector on one ticker-day.
///
/// `ticker`, `date`, `time` and `bar_index` are stamped by the detector runner
/// from the replay cursor, never by the detector itself. `metrics` is a
/// `BTreeMap` so serialization order is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub ticker: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    /// Index of the signal bar within its ticker-day.
    pub bar_index: usize,
    pub direction: Direction,
    /// Conviction, 0..=100.
    pub strength: f64,
    pub metrics: BTreeMap<String, f64>,
}

impl Signal {
    /// Ranking order used everywhere signals compete: strength descending,
    /// then ticker, date and time ascending.
    ///
    /// `total_cmp` keeps the order total even for pathological floats, so a
    /// stable sort with this comparator is fully deterministic.
    pub fn rank_cmp(a: &Signal, b: &Signal) -> Ordering {
        b.strength
            .total_cmp(&a.strength)
            .then_with(|| a.ticker.cmp(&b.ticker))
            .then_with(|| a.date.cmp(&b.date))
            .then_with(|| a.time.cmp(&b.time))
            .then_with(|| a.bar_index.cmp(&b.bar_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(ticker: &str, strength: f64, minute: u32) -> Signal {
        Signal {
            ticker: ticker.into(),
            date: NaiveDate::from_ymd_opt(2025, 11, 7).unwrap(),
            time: NaiveTime::from_hms_opt(10, minute, 0).unwrap(),
            bar_index: minute as usize,
            direction: Direction::Long,
            strength,
            metrics: BTreeMap::new(),
        }
    }

    #[test]
    fn rank_prefers_higher_strength() {
        let a = signal("AAA", 60.0, 5);
        let b = signal("AAA", 80.0, 10);
        assert_eq!(Signal::rank_cmp(&b, &a), Ordering::Less);
    }

    #[test]
    fn rank_ties_break_by_ticker_then_time() {
        let a = signal("BBB", 70.0, 5);
        let b = signal("AAA", 70.0, 10);
        let c = signal("AAA", 70.0, 3);
        let mut v = vec![a, b, c];
        v.sort_by(Signal::rank_cmp);
        assert_eq!(v[0].ticker, "AAA");
        assert_eq!(v[0].bar_index, 3);
        assert_eq!(v[1].bar_index, 10);
        assert_eq!(v[2].ticker, "BBB");
    }

    #[test]
    fn direction_sign() {
        assert_eq!(Direction::Long.sign(), 1.0);
        assert_eq!(Direction::Short.sign(), -1.0);
    }
}
