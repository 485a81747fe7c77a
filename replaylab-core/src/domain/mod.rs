//! Domain types for ReplayLab

pub mod bar;
pub mod ids;
pub mod signal;
pub mod trade;

pub use bar::Bar;
pub use ids::{Fingerprint, UnitKey};
pub use signal::{Direction, Signal};
pub use trade::{ExitReason, Trade};

