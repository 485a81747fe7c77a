//! Temporal isolation: ticker-day bar sets and the forward-only replay cursor.

pub mod cursor;
pub mod ticker_day;

pub use cursor::ReplayCursor;
pub use ticker_day::{TickerDay, TickerDayError};
