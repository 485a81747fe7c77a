//! ReplayLab CLI: run, walk-forward, and synthetic data commands.
//!
//! Commands:
//! - `run`: execute a backtest from a TOML config file
//! - `walk-forward`: train once, then test on later windows
//! - `synth-data`: write a deterministic synthetic Parquet store

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use replaylab_core::data::{BarStore, ParquetBarStore, SyntheticBarStore, Timeframe};
use replaylab_runner::metrics::RunMetrics;
use replaylab_runner::{
    run_backtest, run_walk_forward, save_run_artifacts, save_walk_forward_artifacts, RunConfig,
    RunReport, Significance, WalkForwardFileConfig, WalkForwardReport,
};

#[derive(Parser)]
#[command(
    name = "replaylab",
    about = "ReplayLab CLI: point-in-time intraday backtesting and walk-forward validation"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a backtest from a TOML config file.
    Run {
        /// Path to a TOML run config.
        #[arg(long)]
        config: PathBuf,

        /// Parquet store root. Defaults to ./data.
        #[arg(long, default_value = "data")]
        data: PathBuf,

        /// Replay generated bars with this seed instead of reading the store.
        #[arg(long)]
        synthetic: Option<u64>,

        /// Results root; files go to a subdirectory named by run id.
        #[arg(long, default_value = "results")]
        out: PathBuf,
    },
    /// Run a walk-forward plan from a TOML config file.
    WalkForward {
        /// Path to a TOML walk-forward config.
        #[arg(long)]
        config: PathBuf,

        /// Parquet store root. Defaults to ./data.
        #[arg(long, default_value = "data")]
        data: PathBuf,

        /// Replay generated bars with this seed instead of reading the store.
        #[arg(long)]
        synthetic: Option<u64>,

        /// Results root; files go to a subdirectory named by run id.
        #[arg(long, default_value = "results")]
        out: PathBuf,
    },
    /// Generate synthetic intraday bars and write them to a Parquet store.
    SynthData {
        /// Comma-separated tickers (e.g., AMD,MU,NVDA).
        #[arg(long, value_delimiter = ',', required = true)]
        tickers: Vec<String>,

        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: String,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: String,

        /// Bar timeframe (1m, 5m, 15m, 30m, 1h, 1d).
        #[arg(long, default_value = "5m")]
        timeframe: String,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Per-minute return volatility of the random walk.
        #[arg(long)]
        volatility: Option<f64>,

        /// Parquet store root. Defaults to ./data.
        #[arg(long, default_value = "data")]
        data: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            data,
            synthetic,
            out,
        } => run_cmd(config, data, synthetic, out),
        Commands::WalkForward {
            config,
            data,
            synthetic,
            out,
        } => walk_forward_cmd(config, data, synthetic, out),
        Commands::SynthData {
            tickers,
            start,
            end,
            timeframe,
            seed,
            volatility,
            data,
        } => synth_data_cmd(tickers, &start, &end, &timeframe, seed, volatility, data),
    }
}

fn open_store(data: PathBuf, synthetic: Option<u64>) -> Box<dyn BarStore> {
    match synthetic {
        Some(seed) => {
            info!("using synthetic bars, seed {seed}");
            Box::new(SyntheticBarStore::new(seed))
        }
        None => Box::new(ParquetBarStore::new(data)),
    }
}

/// Output directories are keyed by the config's content hash.
fn short_id(run_id: &str) -> &str {
    &run_id[..run_id.len().min(12)]
}

fn run_cmd(config: PathBuf, data: PathBuf, synthetic: Option<u64>, out: PathBuf) -> Result<()> {
    let cfg = RunConfig::from_file(&config)?;
    let request = cfg.to_request()?;
    let detector = cfg.detector.build();
    let store = open_store(data, synthetic);

    let run_dir = out.join(short_id(&cfg.run_id()?));

    let report = run_backtest(&request, store.as_ref(), detector)?;
    print_run_summary(&report);

    let written = save_run_artifacts(&report, &run_dir)?;
    println!("{} files written to {}", written.len(), run_dir.display());
    Ok(())
}

fn walk_forward_cmd(
    config: PathBuf,
    data: PathBuf,
    synthetic: Option<u64>,
    out: PathBuf,
) -> Result<()> {
    let cfg = WalkForwardFileConfig::from_file(&config)?;
    let plan = cfg.to_plan()?;
    let synthesizer = cfg.synthesizer();
    let store = open_store(data, synthetic);

    let run_dir = out.join(format!("wf_{}", short_id(&cfg.run_id()?)));

    let report = run_walk_forward(&plan, &synthesizer, store.as_ref())?;
    print_walk_forward_summary(&report);

    let written = save_walk_forward_artifacts(&report, &run_dir)?;
    println!("{} files written to {}", written.len(), run_dir.display());
    Ok(())
}

fn synth_data_cmd(
    tickers: Vec<String>,
    start: &str,
    end: &str,
    timeframe: &str,
    seed: u64,
    volatility: Option<f64>,
    data: PathBuf,
) -> Result<()> {
    let start = NaiveDate::parse_from_str(start, "%Y-%m-%d")
        .with_context(|| format!("invalid --start '{start}'"))?;
    let end = NaiveDate::parse_from_str(end, "%Y-%m-%d")
        .with_context(|| format!("invalid --end '{end}'"))?;
    if end < start {
        bail!("--end ({end}) is before --start ({start})");
    }
    let timeframe: Timeframe = timeframe.parse()?;

    let mut generator = SyntheticBarStore::new(seed);
    if let Some(v) = volatility {
        generator = generator.with_volatility(v);
    }
    let store = ParquetBarStore::new(&data);

    let mut files = 0usize;
    for ticker in &tickers {
        for date in start.iter_days().take_while(|d| *d <= end) {
            let bars = generator.generate_day(ticker, date, timeframe);
            if bars.is_empty() {
                continue;
            }
            store.write_day(ticker, date, timeframe, &bars)?;
            files += 1;
        }
        info!("{ticker}: wrote {start}..{end} at {timeframe}");
    }
    println!(
        "Wrote {files} ticker-days for {} tickers to {}",
        tickers.len(),
        data.display()
    );
    Ok(())
}

// ─── Summaries ──────────────────────────────────────────────────────

fn significance_label(s: &Significance) -> String {
    match s {
        Significance::InsufficientSample {
            sample_size,
            required,
        } => format!("insufficient sample ({sample_size} < {required})"),
        Significance::Tested(t) => format!("t={:.2} p={:.4}", t.t_statistic, t.p_two_sided),
        Significance::Undefined => "undefined (zero variance)".into(),
    }
}

fn print_metrics_row(label: &str, m: &RunMetrics) {
    let sharpe = m
        .sharpe
        .map(|s| format!("{s:.3}"))
        .unwrap_or_else(|| "n/a".into());
    println!(
        "  {label:<20} trades {:>4}  win {:>5.1}%  pf {:>7.2}  exp {:>6.3}%  sharpe {sharpe:>6}  {}",
        m.trades,
        m.win_rate * 100.0,
        m.profit_factor,
        m.expectancy_pct,
        significance_label(&m.significance)
    );
}

fn print_run_summary(report: &RunReport) {
    println!("Detector:   {}", report.detector.label());
    println!(
        "Units:      {} scheduled, {} with data",
        report.units, report.eligible_units
    );
    println!(
        "Signals:    {} candidates, {} after filtering",
        report.candidates,
        report.signals.len()
    );
    println!("Policies:");
    for rank in &report.ranking {
        if let Some(p) = report.policy(&rank.policy) {
            print_metrics_row(&format!("#{} {}", rank.rank, p.policy), &p.metrics);
        }
    }
    match &report.winner {
        Some(w) => println!("Winner:     {w}"),
        None => println!("Winner:     none (no trades)"),
    }
    if report.timed_out() {
        println!(
            "Timed out:  {} units cancelled by the plan deadline; results are partial",
            report.cancelled_units
        );
    }
    let f = &report.failures;
    if !f.is_empty() {
        println!(
            "Failures:   {} no data, {} detector, {} timeout, {} cancelled, {} policy, {} skipped",
            f.data_unavailable(),
            f.detector_failures(),
            f.timeouts(),
            f.cancelled(),
            f.policies.len(),
            f.skipped_signals.len()
        );
    }
}

fn print_walk_forward_summary(report: &WalkForwardReport) {
    println!(
        "Detector:   {} (trained on {})",
        report.detector.label(),
        report.train
    );
    for w in &report.windows {
        let note = if w.cancelled_units > 0 {
            "  [cut short by plan deadline]"
        } else if w.zero_signals {
            "  [zero signals]"
        } else {
            ""
        };
        println!(
            "Window {} {}: {} units with data, {} signals{note}",
            w.index, w.window, w.eligible_units, w.signal_count
        );
        for p in &w.policies {
            print_metrics_row(&p.policy, &p.metrics);
        }
    }
    if let Some(k) = report.timed_out_at() {
        println!("Plan timed out in window {k}; later windows did not run");
    }
    println!("Aggregate:");
    for a in &report.aggregate {
        print_metrics_row(&a.policy, &a.metrics);
        let t = a
            .window_t_test
            .as_ref()
            .map(|t| format!("t={:.2} p={:.4}", t.t_statistic, t.p_two_sided))
            .unwrap_or_else(|| "n/a".into());
        println!(
            "  {:<20} consistency {:.0}%  across-window {t}",
            "",
            a.consistency * 100.0
        );
    }
}
