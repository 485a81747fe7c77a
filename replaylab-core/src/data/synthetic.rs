//! Deterministic synthetic intraday bars.
//!
//! Each ticker-day is generated from its own RNG stream, seeded by a BLAKE3
//! hash of `(seed, ticker, date)`. Generation is therefore independent of call
//! order and thread scheduling: two workers asking for the same ticker-day get
//! identical bars.

use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::store::{BarStore, StoreError, Timeframe};
use crate::domain::Bar;

/// Regular session open.
pub fn session_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN)
}

/// Regular session length in minutes (09:30–16:00).
pub const SESSION_MINUTES: i64 = 390;

#[derive(Debug, Clone)]
pub struct SyntheticBarStore {
    seed: u64,
    /// Per-bar volatility as a fraction of price.
    volatility: f64,
}

impl SyntheticBarStore {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            volatility: 0.002,
        }
    }

    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = volatility;
        self
    }

    fn stream_seed(&self, ticker: &str, date: NaiveDate, salt: &str) -> u64 {
        let key = format!("{}:{}:{}:{}", self.seed, ticker, date, salt);
        let hash = blake3::hash(key.as_bytes());
        let mut first = [0u8; 8];
        first.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(first)
    }

    /// Deterministic anchor price per ticker (10..210).
    fn anchor_price(&self, ticker: &str) -> f64 {
        let mut rng = StdRng::seed_from_u64(self.stream_seed(ticker, NaiveDate::MIN, "anchor"));
        rng.gen_range(10.0..210.0)
    }

    /// Generate one session of bars.
    pub fn generate_day(&self, ticker: &str, date: NaiveDate, timeframe: Timeframe) -> Vec<Bar> {
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return Vec::new();
        }

        let mut rng = StdRng::seed_from_u64(self.stream_seed(ticker, date, "day"));
        let step = timeframe.minutes().min(SESSION_MINUTES);
        let n_bars = (SESSION_MINUTES / step).max(1) as usize;
        let bar_vol = self.volatility * (step as f64).sqrt();

        // Day-level regime: opening gap and drift.
        let gap: f64 = rng.gen_range(-0.04..0.04);
        let drift: f64 = rng.gen_range(-0.0005..0.0005);
        let mut price = self.anchor_price(ticker) * (1.0 + gap);
        let open_ts = date.and_time(session_open());

        let mut bars = Vec::with_capacity(n_bars);
        for i in 0..n_bars {
            let open = price;
            let shock: f64 = rng.gen_range(-1.0..1.0) * bar_vol;
            let close = (open * (1.0 + drift + shock)).max(0.01);
            let wick_up: f64 = rng.gen_range(0.0..1.0) * bar_vol * open;
            let wick_down: f64 = rng.gen_range(0.0..1.0) * bar_vol * open;
            let high = open.max(close) + wick_up;
            let low = (open.min(close) - wick_down).max(0.005);
            let volume = rng.gen_range(1_000..50_000u64);

            bars.push(Bar::new(
                open_ts + chrono::Duration::minutes(step * i as i64),
                open,
                high,
                low,
                close,
                volume,
            ));
            price = close;
        }
        bars
    }
}

impl BarStore for SyntheticBarStore {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn get_bars(
        &self,
        ticker: &str,
        date: NaiveDate,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, StoreError> {
        Ok(self.generate_day(ticker, date, timeframe))
    }
}
