//! Detector fingerprinting: deterministic identification of a resolved
//! detection function.
//!
//! Walk-forward validation is only out-of-sample if the same detector runs on
//! every test window. The fingerprint makes that checkable: it is a BLAKE3
//! hash over the detector's name, version and every parameter value, so any
//! re-fit between windows changes it.

use crate::domain::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Audit identity of a detector.
///
/// Uses `BTreeMap` for deterministic key ordering during serialization → hashing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorIdentity {
    pub name: String,
    pub version: String,
    pub params: BTreeMap<String, f64>,
    pub fingerprint: Fingerprint,
}

#[derive(Serialize)]
struct Canonical<'a> {
    name: &'a str,
    version: &'a str,
    params: &'a BTreeMap<String, f64>,
}

impl DetectorIdentity {
    pub fn of(name: &str, version: &str, params: &BTreeMap<String, f64>) -> Self {
        let canonical = Canonical {
            name,
            version,
            params,
        };
        // Serializing a struct of strings and a BTreeMap<String, f64> cannot
        // fail; the fallback only exists to avoid a panic path.
        let bytes = serde_json::to_vec(&canonical)
            .unwrap_or_else(|_| format!("{name}:{version}:{params:?}").into_bytes());
        Self {
            name: name.to_string(),
            version: version.to_string(),
            params: params.clone(),
            fingerprint: Fingerprint::from_bytes(&bytes),
        }
    }

    /// `name@version#fingerprint-prefix`, for log lines.
    pub fn label(&self) -> String {
        format!("{}@{}#{}", self.name, self.version, self.fingerprint.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(range_bars: f64) -> BTreeMap<String, f64> {
        let mut m = BTreeMap::new();
        m.insert("range_bars".into(), range_bars);
        m.insert("min_volume_ratio".into(), 1.2);
        m
    }

    #[test]
    fn identical_detectors_share_fingerprint() {
        let a = DetectorIdentity::of("opening_range_breakout", "1", &params(6.0));
        let b = DetectorIdentity::of("opening_range_breakout", "1", &params(6.0));
        assert_eq!(a, b);
    }

    #[test]
    fn any_param_change_changes_fingerprint() {
        let a = DetectorIdentity::of("opening_range_breakout", "1", &params(6.0));
        let b = DetectorIdentity::of("opening_range_breakout", "1", &params(7.0));
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn version_bump_changes_fingerprint() {
        let a = DetectorIdentity::of("opening_range_breakout", "1", &params(6.0));
        let b = DetectorIdentity::of("opening_range_breakout", "2", &params(6.0));
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn label_is_compact() {
        let a = DetectorIdentity::of("orb", "3", &BTreeMap::new());
        assert!(a.label().starts_with("orb@3#"));
        assert_eq!(a.label().len(), "orb@3#".len() + 12);
    }
}
