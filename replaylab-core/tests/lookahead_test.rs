//! Look-ahead contamination tests for the replay cursor and the detector runner.
//!
//! Invariant:
//! At replay step i, no cursor accessor returns a bar timestamped later than
//! bar i, and nothing from the next session is ever exposed.
//!
//! Two methods:
//! 1. Instrumented detector: record the newest timestamp every accessor
//!    returns at every step and compare against bar i, over random bar sets.
//! 2. Truncation equivalence: run each built-in detector on a truncated day
//!    and on the full day; candidates before the cut must be identical.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use std::sync::{Arc, Mutex};

use replaylab_core::data::{BarStore, MemoryBarStore, SyntheticBarStore, Timeframe};
use replaylab_core::detect::{
    Accumulator, Detection, Detector, DetectorError, DetectorRunner, RunnerConfig, SelectionPolicy,
};
use replaylab_core::detectors::{BuiltinDetector, OrbParams, VwapCrossParams};
use replaylab_core::domain::Bar;
use replaylab_core::replay::{ReplayCursor, TickerDay};

// ── Instrumented detector ────────────────────────────────────────────

/// Records, per step, the newest timestamp any accessor handed out.
struct Recorder {
    lookback: usize,
    seen: Mutex<Vec<(usize, NaiveDateTime)>>,
}

impl Recorder {
    fn new(lookback: usize) -> Self {
        Self {
            lookback,
            seen: Mutex::new(Vec::new()),
        }
    }
}

impl Detector for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn warmup_bars(&self) -> usize {
        0
    }

    fn detect(
        &self,
        cursor: &ReplayCursor<'_>,
        _acc: &mut Accumulator,
    ) -> Result<Option<Detection>, DetectorError> {
        let i = cursor.index().expect("detect is only called after advance");
        let newest = [
            cursor.latest().map(|b| b.timestamp),
            cursor.window(None).iter().map(|b| b.timestamp).max(),
            cursor
                .window(Some(self.lookback))
                .iter()
                .map(|b| b.timestamp)
                .max(),
        ]
        .into_iter()
        .flatten()
        .max()
        .expect("cursor exposes at least bar i");
        self.seen.lock().unwrap().push((i, newest));
        Ok(None)
    }
}

fn session(date: NaiveDate, gaps: &[i64]) -> Vec<Bar> {
    let mut ts = date.and_hms_opt(9, 30, 0).unwrap();
    gaps.iter()
        .enumerate()
        .map(|(i, gap)| {
            ts += Duration::minutes(*gap);
            let p = 40.0 + (i as f64 * 0.7).sin();
            Bar::new(ts, p, p + 0.4, p - 0.4, p + 0.1, 500 + i as u64)
        })
        .collect()
}

proptest! {
    /// For every step, the newest exposed bar is exactly bar i.
    #[test]
    fn cursor_never_exposes_future_bars(
        gaps in prop::collection::vec(1i64..15, 1..120),
        lookback in 0usize..40,
    ) {
        let date = NaiveDate::from_ymd_opt(2025, 11, 12).unwrap();
        let bars = session(date, &gaps);
        let day = TickerDay::new("PROP", date, bars, None).unwrap();
        let recorder = Arc::new(Recorder::new(lookback));
        let runner = DetectorRunner::new(recorder.clone(), RunnerConfig::default());

        let out = runner.run_day(&day, None);
        prop_assert!(out.is_completed());

        // Long gap sequences run past midnight; the day keeps only its own date.
        let seen = recorder.seen.lock().unwrap();
        prop_assert_eq!(seen.len(), day.len());
        for (i, newest) in seen.iter() {
            let bar = day.bar_at(*i).unwrap();
            prop_assert_eq!(*newest, bar.timestamp);
            prop_assert_eq!(newest.date(), date);
        }
    }
}

#[test]
fn bars_past_midnight_are_clipped_from_the_day() {
    // GIVEN ten-minute bars from 09:40 whose 87th bar lands on midnight
    let date = NaiveDate::from_ymd_opt(2025, 11, 12).unwrap();
    let bars = session(date, &[10; 100]);
    assert_eq!(bars[85].timestamp.date(), date);
    assert_eq!(bars[86].timestamp.date(), date.succ_opt().unwrap());

    // WHEN it is replayed
    let day = TickerDay::new("PROP", date, bars, None).unwrap();
    let recorder = Arc::new(Recorder::new(5));
    let runner = DetectorRunner::new(recorder.clone(), RunnerConfig::default());
    assert!(runner.run_day(&day, None).is_completed());

    // THEN only the 86 same-date bars were ever exposed
    assert_eq!(day.len(), 86);
    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen.len(), 86);
    assert!(seen.iter().all(|(_, ts)| ts.date() == date));
}

#[test]
fn next_session_is_never_exposed_even_when_contiguous() {
    let d1 = NaiveDate::from_ymd_opt(2025, 11, 12).unwrap();
    let d2 = d1.succ_opt().unwrap();
    let mut series = session(d1, &[5; 78]);
    series.extend(session(d2, &[5; 78]));
    let store = MemoryBarStore::new().with_bars("CONT", Timeframe::FiveMinutes, series);

    let recorder = Arc::new(Recorder::new(500));
    let runner = DetectorRunner::new(recorder.clone(), RunnerConfig::default());
    let out = runner
        .run_unit(&store, "CONT", d1, Timeframe::FiveMinutes)
        .unwrap();

    assert!(out.is_completed());
    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen.len(), 78);
    assert!(seen.iter().all(|(_, ts)| ts.date() == d1));
}

// ── Truncation equivalence ───────────────────────────────────────────

/// All candidates a detector produces on `day`, ordered by bar index.
fn all_candidates(spec: &BuiltinDetector, day: &TickerDay) -> Vec<(usize, String)> {
    let runner = DetectorRunner::new(
        spec.build(),
        RunnerConfig {
            selection: SelectionPolicy::TopK(usize::MAX),
            ..RunnerConfig::default()
        },
    );
    let mut out: Vec<(usize, String)> = runner
        .run_day(day, None)
        .signals
        .into_iter()
        .map(|s| (s.bar_index, serde_json::to_string(&s).unwrap()))
        .collect();
    out.sort();
    out
}

#[test]
fn builtin_detectors_do_not_depend_on_later_bars() {
    let store = SyntheticBarStore::new(17).with_volatility(0.004);
    let specs = [
        BuiltinDetector::OpeningRangeBreakout(OrbParams {
            min_volume_ratio: 0.0,
            ..OrbParams::default()
        }),
        BuiltinDetector::GapDownVwapReclaim(VwapCrossParams {
            min_gap_pct: 0.01,
            min_volume_ratio: 0.0,
            max_vwap_crosses: 50,
            ..VwapCrossParams::default()
        }),
        BuiltinDetector::GapUpVwapFade(VwapCrossParams {
            min_gap_pct: 0.01,
            min_volume_ratio: 0.0,
            max_vwap_crosses: 50,
            ..VwapCrossParams::default()
        }),
    ];

    let mut compared = 0;
    for offset in 0..10 {
        let date = NaiveDate::from_ymd_opt(2025, 11, 3).unwrap() + Duration::days(offset);
        for ticker in ["AAA", "BBB", "CCC"] {
            let bars = store
                .get_bars(ticker, date, Timeframe::FiveMinutes)
                .unwrap();
            if bars.is_empty() {
                continue;
            }
            let prior = store
                .prior_close(ticker, date, Timeframe::FiveMinutes)
                .unwrap();
            let cut = bars.len() / 2;
            let full = TickerDay::new(ticker, date, bars.clone(), prior).unwrap();
            let truncated = TickerDay::new(ticker, date, bars[..cut].to_vec(), prior).unwrap();

            for spec in &specs {
                let on_full: Vec<_> = all_candidates(spec, &full)
                    .into_iter()
                    .filter(|(i, _)| *i < cut)
                    .collect();
                let on_truncated = all_candidates(spec, &truncated);
                assert_eq!(
                    on_full,
                    on_truncated,
                    "{} on {ticker} {date}: candidates before bar {cut} changed with later data",
                    spec.name()
                );
                compared += 1;
            }
        }
    }
    assert!(compared > 0);
}
