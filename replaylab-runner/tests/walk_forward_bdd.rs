//! BDD scenarios for walk-forward validation.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use replaylab_core::data::{BarStore, MemoryBarStore, SyntheticBarStore, Timeframe};
use replaylab_core::detect::{
    Accumulator, Detection, Detector, DetectorError, FixedSynthesizer, RunnerConfig,
    StrategySynthesizer, SynthesisError, SynthesisRequest, TrainingBars,
};
use replaylab_core::execution::{ExitPolicy, ExitRules, RulePolicy};
use replaylab_core::filter::FilterConfig;
use replaylab_core::replay::ReplayCursor;
use replaylab_runner::{
    enumerate_units, run_walk_forward, DateWindow, MetricsConfig, PlanState, PoolConfig,
    RankingMetric, WalkForwardError, WalkForwardPlan,
};

fn d(m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, m, day).unwrap()
}

/// Fires at one bar index with a strength derived from the bar's range.
struct EveryDay {
    at: usize,
    threshold: f64,
}

impl Detector for EveryDay {
    fn name(&self) -> &str {
        "every_day"
    }

    fn params(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("at".to_string(), self.at as f64),
            ("threshold".to_string(), self.threshold),
        ])
    }

    fn warmup_bars(&self) -> usize {
        0
    }

    fn detect(
        &self,
        cursor: &ReplayCursor<'_>,
        _acc: &mut Accumulator,
    ) -> Result<Option<Detection>, DetectorError> {
        if cursor.index() != Some(self.at) {
            return Ok(None);
        }
        Ok((self.threshold <= 100.0).then(|| Detection::long(75.0)))
    }
}

/// Counts calls and hands out a fresh detector each time, so a second call
/// would be visible both in the count and as a new instance.
struct Counting {
    calls: AtomicUsize,
    threshold: f64,
}

impl Counting {
    fn new(threshold: f64) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            threshold,
        }
    }
}

impl StrategySynthesizer for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    fn synthesize(
        &self,
        _request: &SynthesisRequest,
        _training: &TrainingBars<'_>,
    ) -> Result<Arc<dyn Detector>, SynthesisError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(EveryDay {
            at: 10 + n,
            threshold: self.threshold,
        }))
    }
}

fn plan(tests: Vec<DateWindow>) -> WalkForwardPlan {
    let policy: Arc<dyn ExitPolicy> =
        Arc::new(RulePolicy::new("tp2_sl1", ExitRules::bracket(2.0, 1.0)).unwrap());
    WalkForwardPlan {
        description: "fires at bar ten".into(),
        tickers: vec!["AMD".into(), "MU".into()],
        timeframe: Timeframe::FiveMinutes,
        train: DateWindow::new(d(10, 1), d(10, 31)),
        tests,
        filter: FilterConfig {
            min_strength: 50.0,
            max_per_ticker_date: 1,
            max_per_date: 5,
            max_total: 50,
        },
        policies: vec![policy],
        runner: RunnerConfig::default(),
        pool: PoolConfig::default(),
        metrics: MetricsConfig::default(),
        ranking: RankingMetric::ProfitFactor,
    }
}

fn three_weeks() -> Vec<DateWindow> {
    vec![
        DateWindow::new(d(11, 3), d(11, 7)),
        DateWindow::new(d(11, 10), d(11, 14)),
        DateWindow::new(d(11, 17), d(11, 21)),
    ]
}

#[test]
fn bdd_walk_forward_synthesizes_once_and_never_refits() {
    // GIVEN a three-window plan and a synthesizer that counts its calls
    let store = SyntheticBarStore::new(7);
    let synthesizer = Counting::new(50.0);

    // WHEN the plan runs to completion
    let report = run_walk_forward(&plan(three_weeks()), &synthesizer, &store).unwrap();

    // THEN synthesis happened exactly once
    assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 1);

    // AND every window ran the same detector identity
    assert_eq!(report.windows.len(), 3);
    for w in &report.windows {
        assert_eq!(w.fingerprint, report.detector.fingerprint);
    }
    assert!(report.is_non_refitting());
    assert_eq!(report.detector.params["at"], 10.0);

    // AND the plan ends aggregated with per-window and overall metrics
    assert_eq!(report.state, PlanState::Aggregated);
    assert_eq!(report.aggregate.len(), 1);
    let agg = &report.aggregate[0];
    let per_window: usize = report
        .windows
        .iter()
        .map(|w| w.policies[0].metrics.trades)
        .sum();
    assert_eq!(agg.metrics.trades, per_window);
    assert_eq!(agg.window_expectancy_pct.len(), 3);
    assert!((0.0..=1.0).contains(&agg.consistency));
}

#[test]
fn bdd_windows_only_see_their_own_dates() {
    // GIVEN a completed plan
    let store = SyntheticBarStore::new(8);
    let report = run_walk_forward(&plan(three_weeks()), &Counting::new(50.0), &store).unwrap();

    // THEN every trade in a window falls inside that window
    for w in &report.windows {
        assert_eq!(w.eligible_units, 10);
        for t in &w.policies[0].trades {
            assert!(w.window.contains(t.date), "{} outside {}", t.date, w.window);
        }
    }
}

#[test]
fn bdd_zero_eligible_days_fail_fast() {
    // GIVEN bars only for the first test window
    let synthetic = SyntheticBarStore::new(9);
    let mut store = MemoryBarStore::new();
    for day in [3, 4, 5, 6, 7] {
        for ticker in ["AMD", "MU"] {
            let bars = synthetic
                .get_bars(ticker, d(11, day), Timeframe::FiveMinutes)
                .unwrap();
            store.insert(ticker, Timeframe::FiveMinutes, bars);
        }
    }
    let synthesizer = Counting::new(50.0);

    // WHEN the plan runs
    let err = run_walk_forward(&plan(three_weeks()), &synthesizer, &store).unwrap_err();

    // THEN it stops at window 2 with a data-availability error
    match err {
        WalkForwardError::NoEligibleData { index, window } => {
            assert_eq!(index, 2);
            assert_eq!(window, three_weeks()[1]);
        }
        other => panic!("expected NoEligibleData, got {other}"),
    }
    assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn bdd_zero_signals_is_not_a_data_error() {
    // GIVEN data for every window and a detector that never fires
    let store = SyntheticBarStore::new(10);
    let synthesizer = Counting::new(1000.0);

    // WHEN the plan runs
    let report = run_walk_forward(&plan(three_weeks()), &synthesizer, &store).unwrap();

    // THEN every window completes, flagged as zero signals, with eligible data
    assert!(report
        .windows
        .iter()
        .all(|w| w.zero_signals && w.signal_count == 0 && w.eligible_units > 0));
    assert_eq!(report.aggregate[0].metrics.trades, 0);
    assert!(report.aggregate[0].window_t_test.is_none());
}

#[test]
fn bdd_overlapping_windows_fail_before_synthesis() {
    // GIVEN overlapping test windows
    let tests = vec![
        DateWindow::new(d(11, 3), d(11, 10)),
        DateWindow::new(d(11, 10), d(11, 14)),
    ];
    let synthesizer = Counting::new(50.0);

    // WHEN the plan runs
    let err = run_walk_forward(&plan(tests), &synthesizer, &SyntheticBarStore::new(1)).unwrap_err();

    // THEN it is a configuration error and nothing was synthesized
    assert!(matches!(err, WalkForwardError::Config(_)));
    assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn bdd_offline_store_fails_before_synthesis() {
    let mut store = MemoryBarStore::new();
    store.set_offline(true);
    let synthesizer = Counting::new(50.0);
    let err = run_walk_forward(&plan(three_weeks()), &synthesizer, &store).unwrap_err();
    assert!(matches!(err, WalkForwardError::StoreUnavailable { .. }));
    assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 0);
}

/// Sleeps on every step so a window has a known minimum wall time.
struct Sleepy {
    per_step: Duration,
}

impl Detector for Sleepy {
    fn name(&self) -> &str {
        "sleepy"
    }

    fn warmup_bars(&self) -> usize {
        0
    }

    fn detect(
        &self,
        _cursor: &ReplayCursor<'_>,
        _acc: &mut Accumulator,
    ) -> Result<Option<Detection>, DetectorError> {
        std::thread::sleep(self.per_step);
        Ok(None)
    }
}

/// Reports a new parameter value every time it is asked.
struct Drifting {
    reads: AtomicUsize,
}

impl Detector for Drifting {
    fn name(&self) -> &str {
        "drifting"
    }

    fn params(&self) -> BTreeMap<String, f64> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst);
        BTreeMap::from([("threshold".to_string(), n as f64)])
    }

    fn warmup_bars(&self) -> usize {
        0
    }

    fn detect(
        &self,
        _cursor: &ReplayCursor<'_>,
        _acc: &mut Accumulator,
    ) -> Result<Option<Detection>, DetectorError> {
        Ok(None)
    }
}

/// Fits on the training window: records every date it got bars for and
/// whether a test-window read came back empty.
struct Fitting {
    dates: Mutex<Vec<NaiveDate>>,
    test_read_empty: Mutex<Option<bool>>,
}

impl StrategySynthesizer for Fitting {
    fn name(&self) -> &str {
        "fitting"
    }

    fn synthesize(
        &self,
        request: &SynthesisRequest,
        training: &TrainingBars<'_>,
    ) -> Result<Arc<dyn Detector>, SynthesisError> {
        let reject = |reason: String| SynthesisError::Rejected {
            synthesizer: "fitting".into(),
            reason,
        };
        let mut seen = Vec::new();
        for unit in enumerate_units(&request.tickers, request.train_start, request.train_end) {
            let bars = training
                .get_bars(&unit.ticker, unit.date, request.timeframe)
                .map_err(|e| reject(e.to_string()))?;
            seen.extend(bars.iter().map(|b| b.date()));
        }
        let peek = training
            .get_bars(&request.tickers[0], d(11, 4), request.timeframe)
            .map_err(|e| reject(e.to_string()))?;
        *self.test_read_empty.lock().unwrap() = Some(peek.is_empty());
        *self.dates.lock().unwrap() = seen;
        Ok(Arc::new(EveryDay {
            at: 10,
            threshold: 50.0,
        }))
    }
}

#[test]
fn bdd_plan_timeout_is_not_a_data_error() {
    // GIVEN a store with data for every window and a plan deadline already spent
    let mut p = plan(three_weeks());
    p.pool.plan_timeout_ms = Some(0);
    let synthesizer = Counting::new(50.0);

    // WHEN the plan runs
    let report = run_walk_forward(&p, &synthesizer, &SyntheticBarStore::new(12)).unwrap();

    // THEN it ends timed out in window 1, not with a data-availability error
    assert_eq!(report.state, PlanState::TimedOut(1));
    assert_eq!(report.timed_out_at(), Some(1));
    assert!(!report.is_complete());

    // AND the cut-short window is kept with its units marked cancelled
    assert_eq!(report.windows.len(), 1);
    let w = &report.windows[0];
    assert_eq!(w.cancelled_units, 10);
    assert_eq!(w.eligible_units, 0);
    assert_eq!(w.failures.cancelled(), 10);
    assert_eq!(w.failures.data_unavailable(), 0);
    assert_eq!(report.aggregate.len(), 1);
    assert_eq!(report.aggregate[0].metrics.trades, 0);
}

#[test]
fn bdd_plan_timeout_spans_all_windows() {
    // GIVEN three one-day windows that each take at least 78 x 3 ms to replay
    let tests = vec![
        DateWindow::new(d(11, 3), d(11, 3)),
        DateWindow::new(d(11, 4), d(11, 4)),
        DateWindow::new(d(11, 5), d(11, 5)),
    ];
    let mut p = plan(tests);
    p.pool.plan_timeout_ms = Some(400);
    let synthesizer = FixedSynthesizer::new(Arc::new(Sleepy {
        per_step: Duration::from_millis(3),
    }));

    // WHEN the plan runs against one 400 ms deadline
    let report = run_walk_forward(&p, &synthesizer, &SyntheticBarStore::new(13)).unwrap();

    // THEN the plan as a whole overruns, even though no single window does
    let k = report.timed_out_at().expect("three windows exceed one plan deadline");
    assert!(k <= 3);
    assert_eq!(report.windows.len(), k);
    assert!(report.windows[k - 1].cancelled_units > 0);
    for w in &report.windows[..k - 1] {
        assert_eq!(w.cancelled_units, 0);
    }
}

#[test]
fn bdd_detector_that_rewrites_its_params_is_caught() {
    // GIVEN a detector whose reported parameters change after synthesis
    let synthesizer = FixedSynthesizer::new(Arc::new(Drifting {
        reads: AtomicUsize::new(0),
    }));

    // WHEN the plan runs
    let err = run_walk_forward(&plan(three_weeks()), &synthesizer, &SyntheticBarStore::new(14))
        .unwrap_err();

    // THEN the first window reports the identity change
    match err {
        WalkForwardError::DetectorChanged { index, expected, found } => {
            assert_eq!(index, 1);
            assert_ne!(expected, found);
        }
        other => panic!("expected DetectorChanged, got {other}"),
    }
}

#[test]
fn bdd_synthesis_reads_only_training_bars() {
    // GIVEN a synthesizer that fits on the bars it is handed
    let synthesizer = Fitting {
        dates: Mutex::new(Vec::new()),
        test_read_empty: Mutex::new(None),
    };

    // WHEN the plan runs
    let p = plan(three_weeks());
    let report = run_walk_forward(&p, &synthesizer, &SyntheticBarStore::new(15)).unwrap();
    assert!(report.is_complete());

    // THEN it saw October bars and nothing from the test windows
    let dates = synthesizer.dates.lock().unwrap();
    assert!(!dates.is_empty());
    assert!(dates.iter().all(|date| p.train.contains(*date)));
    assert_eq!(*synthesizer.test_read_empty.lock().unwrap(), Some(true));
}
