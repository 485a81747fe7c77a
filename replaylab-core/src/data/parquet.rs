//! Parquet bar store with Hive-style partitioning.
//!
//! Layout: `{root}/timeframe={TF}/ticker={TICKER}/{YYYY-MM-DD}.parquet`
//!
//! One file per ticker-day keeps reads day-scoped: a query for date D opens
//! exactly one file and can never see rows of D+1.
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Integrity validation on load (schema check, rows belong to the file's date)
//! - Quarantine for corrupt files ({filename}.quarantined)
//!
//! Timestamps are stored as epoch milliseconds of the exchange-local wall
//! clock, the same convention the upstream OHLCV tables use.

use chrono::{DateTime, NaiveDate};
use log::warn;
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

use super::store::{BarStore, StoreError, Timeframe};
use crate::domain::Bar;

const COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

/// Read-only (for the engine) Parquet-backed bar store.
pub struct ParquetBarStore {
    root: PathBuf,
}

impl ParquetBarStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ticker_dir(&self, ticker: &str, timeframe: Timeframe) -> PathBuf {
        self.root
            .join(format!("timeframe={timeframe}"))
            .join(format!("ticker={ticker}"))
    }

    fn day_path(&self, ticker: &str, date: NaiveDate, timeframe: Timeframe) -> PathBuf {
        self.ticker_dir(ticker, timeframe)
            .join(format!("{}.parquet", date.format("%Y-%m-%d")))
    }

    /// Write one ticker-day. All bars must share `date`.
    ///
    /// Used by ingestion tooling and the synthetic data command; the engine
    /// itself never writes.
    pub fn write_day(
        &self,
        ticker: &str,
        date: NaiveDate,
        timeframe: Timeframe,
        bars: &[Bar],
    ) -> Result<(), StoreError> {
        if bars.is_empty() {
            return Err(StoreError::Io("no bars to write".into()));
        }
        if let Some(stray) = bars.iter().find(|b| b.date() != date) {
            return Err(StoreError::Corrupt {
                ticker: ticker.to_string(),
                date,
                reason: format!("bar at {} does not belong to this day", stray.timestamp),
            });
        }

        let dir = self.ticker_dir(ticker, timeframe);
        fs::create_dir_all(&dir).map_err(|e| StoreError::Io(format!("create dir: {e}")))?;

        let df = bars_to_dataframe(bars)?;
        let path = self.day_path(ticker, date, timeframe);
        let tmp_path = path.with_extension("parquet.tmp");

        write_parquet(&df, &tmp_path)?;

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::Io(format!("atomic rename failed: {e}"))
        })
    }
}

impl BarStore for ParquetBarStore {
    fn name(&self) -> &str {
        "parquet"
    }

    fn get_bars(
        &self,
        ticker: &str,
        date: NaiveDate,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, StoreError> {
        if !self.is_available() {
            return Err(StoreError::Unavailable {
                store: self.name().to_string(),
                reason: format!("root {} does not exist", self.root.display()),
            });
        }

        let path = self.day_path(ticker, date, timeframe);
        if !path.exists() {
            return Ok(Vec::new());
        }

        match load_and_validate_parquet(&path, date) {
            Ok(mut bars) => {
                bars.sort_by_key(|b| b.timestamp);
                Ok(bars)
            }
            Err(e) => {
                let quarantine = path.with_extension("parquet.quarantined");
                warn!(
                    "quarantining corrupt bar file {}: {e}",
                    path.display()
                );
                let _ = fs::rename(&path, &quarantine);
                Err(StoreError::Corrupt {
                    ticker: ticker.to_string(),
                    date,
                    reason: e.to_string(),
                })
            }
        }
    }

    fn is_available(&self) -> bool {
        self.root.is_dir()
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn bars_to_dataframe(bars: &[Bar]) -> Result<DataFrame, StoreError> {
    let timestamps: Vec<i64> = bars
        .iter()
        .map(|b| b.timestamp.and_utc().timestamp_millis())
        .collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();

    DataFrame::new(vec![
        Column::new("timestamp".into(), timestamps),
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
    ])
    .map_err(|e| StoreError::Parquet(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), StoreError> {
    let file =
        fs::File::create(path).map_err(|e| StoreError::Parquet(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| StoreError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

/// Load a day file and validate schema and date membership.
fn load_and_validate_parquet(path: &Path, date: NaiveDate) -> Result<Vec<Bar>, StoreError> {
    let file = fs::File::open(path).map_err(|e| StoreError::Parquet(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| StoreError::Parquet(format!("read: {e}")))?;

    for col_name in &COLUMNS {
        if df.column(col_name).is_err() {
            return Err(StoreError::Parquet(format!("missing column '{col_name}'")));
        }
    }

    let bars = dataframe_to_bars(&df)?;
    if let Some(stray) = bars.iter().find(|b| b.date() != date) {
        return Err(StoreError::Parquet(format!(
            "row at {} does not belong to {date}",
            stray.timestamp
        )));
    }
    Ok(bars)
}

fn dataframe_to_bars(df: &DataFrame) -> Result<Vec<Bar>, StoreError> {
    let map_err = |e: PolarsError| StoreError::Parquet(format!("column read: {e}"));

    let ts_ca = df
        .column("timestamp")
        .map_err(map_err)?
        .i64()
        .map_err(|e| StoreError::Parquet(format!("timestamp column type: {e}")))?
        .clone();
    let open_ca = f64_column(df, "open")?;
    let high_ca = f64_column(df, "high")?;
    let low_ca = f64_column(df, "low")?;
    let close_ca = f64_column(df, "close")?;
    let vol_ca = df
        .column("volume")
        .map_err(map_err)?
        .u64()
        .map_err(|e| StoreError::Parquet(format!("volume column type: {e}")))?
        .clone();

    let n = df.height();
    let mut bars = Vec::with_capacity(n);

    for i in 0..n {
        let millis = ts_ca
            .get(i)
            .ok_or_else(|| StoreError::Parquet(format!("null timestamp at row {i}")))?;
        let timestamp = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| StoreError::Parquet(format!("timestamp out of range at row {i}")))?
            .naive_utc();

        bars.push(Bar {
            timestamp,
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(0),
        });
    }

    Ok(bars)
}

fn f64_column(df: &DataFrame, name: &str) -> Result<Float64Chunked, StoreError> {
    df.column(name)
        .map_err(|e| StoreError::Parquet(format!("column read: {e}")))?
        .f64()
        .map(|ca| ca.clone())
        .map_err(|e| StoreError::Parquet(format!("{name} column type: {e}")))
}
