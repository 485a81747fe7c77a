//! Reporting and export: JSON and CSV artifacts for runs and walk-forward plans.
//!
//! - **JSON**: the full `RunReport` / `WalkForwardReport`
//! - **CSV**: filtered signals and one trade tape per exit policy

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use replaylab_core::domain::{Signal, Trade};

use crate::runner::RunReport;
use crate::walk_forward::WalkForwardReport;

// ─── JSON export ────────────────────────────────────────────────────

pub fn run_report_json(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize RunReport to JSON")
}

pub fn walk_forward_json(report: &WalkForwardReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize WalkForwardReport to JSON")
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Columns: ticker, date, direction, policy, signal_time, signal_strength,
/// entry_bar, entry_time, entry_price, exit_bar, exit_time, exit_price,
/// exit_reason, highest_price, lowest_price, pnl, pnl_percent, bars_held
pub fn export_trades_csv(trades: &[Trade]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "ticker",
        "date",
        "direction",
        "policy",
        "signal_time",
        "signal_strength",
        "entry_bar",
        "entry_time",
        "entry_price",
        "exit_bar",
        "exit_time",
        "exit_price",
        "exit_reason",
        "highest_price",
        "lowest_price",
        "pnl",
        "pnl_percent",
        "bars_held",
    ])?;

    for t in trades {
        wtr.write_record([
            &t.ticker,
            &t.date.to_string(),
            &format!("{:?}", t.direction),
            &t.policy,
            &t.signal_time.to_string(),
            &format!("{:.2}", t.signal_strength),
            &t.entry_bar.to_string(),
            &t.entry_time.to_string(),
            &format!("{:.4}", t.entry_price),
            &t.exit_bar.to_string(),
            &t.exit_time.to_string(),
            &format!("{:.4}", t.exit_price),
            &t.exit_reason.to_string(),
            &format!("{:.4}", t.highest_price),
            &format!("{:.4}", t.lowest_price),
            &format!("{:.4}", t.pnl),
            &format!("{:.4}", t.pnl_percent),
            &t.bars_held.to_string(),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

pub fn export_signals_csv(signals: &[Signal]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["ticker", "date", "time", "bar_index", "direction", "strength"])?;
    for s in signals {
        wtr.write_record([
            &s.ticker,
            &s.date.to_string(),
            &s.time.to_string(),
            &s.bar_index.to_string(),
            &format!("{:?}", s.direction),
            &format!("{:.2}", s.strength),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundles ───────────────────────────────────────────────

/// Policy names become file names; keep them filesystem-safe.
fn file_stem(policy: &str) -> String {
    policy
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn write(path: PathBuf, content: &str, written: &mut Vec<PathBuf>) -> Result<()> {
    fs::write(&path, content).with_context(|| format!("failed to write {}", path.display()))?;
    written.push(path);
    Ok(())
}

/// Write `report.json`, `signals.csv` and `trades_{policy}.csv` into
/// `output_dir`. Returns the files written.
pub fn save_run_artifacts(report: &RunReport, output_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let mut written = Vec::new();
    write(output_dir.join("report.json"), &run_report_json(report)?, &mut written)?;
    write(
        output_dir.join("signals.csv"),
        &export_signals_csv(&report.signals)?,
        &mut written,
    )?;
    for p in &report.policies {
        write(
            output_dir.join(format!("trades_{}.csv", file_stem(&p.policy))),
            &export_trades_csv(&p.trades)?,
            &mut written,
        )?;
    }
    Ok(written)
}

/// Write `walk_forward.json` and `window{k}_trades_{policy}.csv`.
pub fn save_walk_forward_artifacts(
    report: &WalkForwardReport,
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let mut written = Vec::new();
    write(
        output_dir.join("walk_forward.json"),
        &walk_forward_json(report)?,
        &mut written,
    )?;
    for w in &report.windows {
        for p in &w.policies {
            write(
                output_dir.join(format!("window{}_trades_{}.csv", w.index, file_stem(&p.policy))),
                &export_trades_csv(&p.trades)?,
                &mut written,
            )?;
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use replaylab_core::domain::{Direction, ExitReason};
    use std::collections::BTreeMap;

    fn sample_trade() -> Trade {
        Trade {
            ticker: "AMD".into(),
            date: NaiveDate::from_ymd_opt(2025, 11, 3).unwrap(),
            direction: Direction::Long,
            policy: "tp2/sl1".into(),
            signal_time: NaiveTime::from_hms_opt(10, 15, 0).unwrap(),
            signal_strength: 80.0,
            entry_bar: 10,
            entry_time: NaiveTime::from_hms_opt(10, 20, 0).unwrap(),
            entry_price: 100.0,
            exit_bar: 14,
            exit_time: NaiveTime::from_hms_opt(10, 40, 0).unwrap(),
            exit_price: 102.0,
            exit_reason: ExitReason::TakeProfit,
            highest_price: 102.3,
            lowest_price: 99.6,
            pnl: 2.0,
            pnl_percent: 2.0,
            bars_held: 4,
        }
    }

    fn sample_signal() -> Signal {
        Signal {
            ticker: "AMD".into(),
            date: NaiveDate::from_ymd_opt(2025, 11, 3).unwrap(),
            time: NaiveTime::from_hms_opt(10, 15, 0).unwrap(),
            bar_index: 9,
            direction: Direction::Long,
            strength: 80.0,
            metrics: BTreeMap::new(),
        }
    }

    #[test]
    fn csv_trades_header_and_row() {
        let csv = export_trades_csv(&[sample_trade()]).unwrap();
        let mut lines = csv.lines();
        let header = lines.next().unwrap();
        assert_eq!(header.split(',').count(), 18);
        assert!(header.starts_with("ticker,date,direction,policy"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("AMD,2025-11-03,Long,tp2/sl1,10:15:00,80.00,10,10:20:00,100.0000"));
        assert!(row.contains("take_profit"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn csv_empty_trades_is_header_only() {
        let csv = export_trades_csv(&[]).unwrap();
        assert_eq!(csv.lines().count(), 1);
    }

    #[test]
    fn csv_signals() {
        let csv = export_signals_csv(&[sample_signal()]).unwrap();
        assert_eq!(
            csv.lines().nth(1).unwrap(),
            "AMD,2025-11-03,10:15:00,9,Long,80.00"
        );
    }

    #[test]
    fn file_stems_are_sanitized() {
        assert_eq!(file_stem("tp2/sl1"), "tp2_sl1");
        assert_eq!(file_stem("trail-1.5"), "trail-1_5");
    }

    #[test]
    fn save_run_artifacts_writes_every_policy() {
        use crate::failures::FailureReport;
        use crate::metrics::{MetricsConfig, RunMetrics};
        use crate::runner::PolicyReport;
        use replaylab_core::data::Timeframe;
        use replaylab_core::filter::FilterStats;
        use replaylab_core::fingerprint::DetectorIdentity;

        let trades = vec![sample_trade()];
        let report = RunReport {
            detector: DetectorIdentity::of("opening_range_breakout", "1", &BTreeMap::new()),
            start: NaiveDate::from_ymd_opt(2025, 11, 3).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 11, 3).unwrap(),
            timeframe: Timeframe::FiveMinutes,
            units: 1,
            eligible_units: 1,
            cancelled_units: 0,
            candidates: 3,
            signals: vec![sample_signal()],
            filter_stats: FilterStats::default(),
            policies: vec![PolicyReport {
                policy: "tp2/sl1".into(),
                metrics: RunMetrics::compute(&trades, &MetricsConfig::default()),
                trades,
                failures: vec![],
                validation_issues: vec![],
                adjusted_p: None,
            }],
            ranking: vec![],
            winner: Some("tp2/sl1".into()),
            failures: FailureReport::default(),
        };

        let dir = tempfile::tempdir().unwrap();
        let written = save_run_artifacts(&report, dir.path()).unwrap();
        assert_eq!(written.len(), 3);
        assert!(dir.path().join("trades_tp2_sl1.csv").exists());

        let json = fs::read_to_string(dir.path().join("report.json")).unwrap();
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.winner.as_deref(), Some("tp2/sl1"));
        assert_eq!(back.policies[0].trades.len(), 1);
    }
}
