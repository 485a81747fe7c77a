//! Detection: the detector contract, per-unit running state, the runner that
//! replays a ticker-day, and the synthesis boundary that produces detectors.

pub mod accumulator;
pub mod detector;
pub mod runner;
pub mod synthesis;

pub use accumulator::{Accumulator, RunningVwap};
pub use detector::{Detection, Detector, DetectorError};
pub use runner::{
    select, DetectorRunner, RunnerConfig, SelectionPolicy, UnitOutcome, UnitStatus,
    DEFAULT_MAX_CONSECUTIVE_FAILURES,
};
pub use synthesis::{
    BuiltinSynthesizer, FixedSynthesizer, StrategySynthesizer, SynthesisError, SynthesisRequest,
    TrainingBars,
};
