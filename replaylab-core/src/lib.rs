//! ReplayLab Core: point-in-time replay, detection, filtering and execution.
//!
//! This crate contains the correctness-critical half of the backtester:
//! - Domain types (bars, signals, trades, unit keys)
//! - Bar store adapters (memory, Parquet, synthetic) and data-quality checks
//! - Replay cursor: the only way detectors and exit policies see bars
//! - Detector contract, per-unit accumulator, detector runner, synthesis boundary
//! - Built-in detector families
//! - Signal filter with diversification caps
//! - Exit policies and the execution evaluator
//! - Detector fingerprinting for walk-forward audits

pub mod data;
pub mod detect;
pub mod detectors;
pub mod domain;
pub mod execution;
pub mod filter;
pub mod fingerprint;
pub mod replay;
