//! TickerDay: the validated bar set of one replay unit.

use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::{Bar, UnitKey};

#[derive(Debug, Error, PartialEq)]
pub enum TickerDayError {
    #[error("{key}: bar {index} at {timestamp} is not after the previous bar")]
    OutOfOrder {
        key: UnitKey,
        index: usize,
        timestamp: chrono::NaiveDateTime,
    },
}

/// One ticker's bars for one calendar date, strictly ascending by timestamp.
///
/// Construction clips the input to `date`: bars from neighbouring sessions that
/// happen to be contiguous in storage are dropped, so nothing built on a
/// `TickerDay` can reach across the day boundary.
#[derive(Debug, Clone)]
pub struct TickerDay {
    key: UnitKey,
    bars: Vec<Bar>,
    prior_close: Option<f64>,
}

impl TickerDay {
    pub fn new(
        ticker: impl Into<String>,
        date: NaiveDate,
        bars: Vec<Bar>,
        prior_close: Option<f64>,
    ) -> Result<Self, TickerDayError> {
        let key = UnitKey::new(ticker, date);
        let bars: Vec<Bar> = bars.into_iter().filter(|b| b.date() == date).collect();

        for (index, pair) in bars.windows(2).enumerate() {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(TickerDayError::OutOfOrder {
                    key,
                    index: index + 1,
                    timestamp: pair[1].timestamp,
                });
            }
        }

        Ok(Self {
            key,
            bars,
            prior_close,
        })
    }

    pub fn key(&self) -> &UnitKey {
        &self.key
    }

    pub fn ticker(&self) -> &str {
        &self.key.ticker
    }

    pub fn date(&self) -> NaiveDate {
        self.key.date
    }

    /// Close of the previous session, if known.
    pub fn prior_close(&self) -> Option<f64> {
        self.prior_close
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Full-day access. Only the cursor and the execution stage's sequential
    /// feed use this; detectors never receive a `TickerDay`.
    pub(crate) fn bars(&self) -> &[Bar] {
        &self.bars
    }

    /// The bar at `index`, for post-run audits (fill validation).
    pub fn bar_at(&self, index: usize) -> Option<&Bar> {
        self.bars.get(index)
    }
}
