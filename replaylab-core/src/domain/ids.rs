use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The unit of replay and of parallel scheduling: one ticker on one date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitKey {
    pub ticker: String,
    pub date: NaiveDate,
}

impl UnitKey {
    pub fn new(ticker: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            ticker: ticker.into(),
            date,
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ticker, self.date)
    }
}

/// Deterministic content hash (BLAKE3, hex encoded).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = Fingerprint::from_bytes(b"orb:1.0");
        let b = Fingerprint::from_bytes(b"orb:1.0");
        assert_eq!(a, b);
        assert_eq!(a.0.len(), 64);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn fingerprint_differs_for_different_input() {
        assert_ne!(
            Fingerprint::from_bytes(b"orb:1.0"),
            Fingerprint::from_bytes(b"orb:1.1")
        );
    }

    #[test]
    fn unit_keys_order_by_ticker_then_date() {
        let d1 = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 1, 3).unwrap();
        let mut keys = vec![
            UnitKey::new("MSFT", d1),
            UnitKey::new("AAPL", d2),
            UnitKey::new("AAPL", d1),
        ];
        keys.sort();
        assert_eq!(keys[0], UnitKey::new("AAPL", d1));
        assert_eq!(keys[1], UnitKey::new("AAPL", d2));
        assert_eq!(keys[2].to_string(), "MSFT@2025-01-02");
    }
}
