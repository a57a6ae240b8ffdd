//! # Metrics Module
//!
//! Performance metric snapshots exchanged with the peer, and the comparison
//! used to highlight where the two instances diverge.
//!
//! ## Wire Shape
//! A snapshot is a flat JSON object of metric name to number:
//! ```json
//! { "accuracy_score": 0.85, "cpu_usage": 0.25, "error_rate": 0.02 }
//! ```
//! Unknown keys are carried through untouched; the well-known keys below
//! are the ones every instance reports.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Well-Known Metric Keys
// =============================================================================

pub const RESPONSE_TIME_AVG: &str = "response_time_avg";
pub const ACCURACY_SCORE: &str = "accuracy_score";
pub const TOKEN_EFFICIENCY: &str = "token_efficiency";
pub const ERROR_RATE: &str = "error_rate";
pub const UPTIME_PERCENTAGE: &str = "uptime_percentage";
pub const MEMORY_USAGE: &str = "memory_usage";
pub const CPU_USAGE: &str = "cpu_usage";

/// Every key a complete snapshot carries.
pub const WELL_KNOWN_KEYS: [&str; 7] = [
    RESPONSE_TIME_AVG,
    ACCURACY_SCORE,
    TOKEN_EFFICIENCY,
    ERROR_RATE,
    UPTIME_PERCENTAGE,
    MEMORY_USAGE,
    CPU_USAGE,
];

/// Relative difference (in percent) above which a comparison is significant.
pub const SIGNIFICANT_DIFF_PERCENT: f64 = 10.0;

// =============================================================================
// Snapshot
// =============================================================================

/// A point-in-time set of named performance metrics.
///
/// Backed by a `BTreeMap` so the serialized form is key-sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsSnapshot(BTreeMap<String, f64>);

impl MetricsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The baseline figures reported when no live measurement is wired in.
    pub fn baseline() -> Self {
        Self::new()
            .with(RESPONSE_TIME_AVG, 0.5)
            .with(ACCURACY_SCORE, 0.85)
            .with(TOKEN_EFFICIENCY, 0.75)
            .with(ERROR_RATE, 0.02)
            .with(UPTIME_PERCENTAGE, 99.5)
            .with(MEMORY_USAGE, 0.45)
            .with(CPU_USAGE, 0.25)
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Keys from [`WELL_KNOWN_KEYS`] that this snapshot lacks.
    pub fn missing_keys(&self) -> Vec<&'static str> {
        WELL_KNOWN_KEYS
            .iter()
            .copied()
            .filter(|k| !self.0.contains_key(*k))
            .collect()
    }
}

impl From<BTreeMap<String, f64>> for MetricsSnapshot {
    fn from(map: BTreeMap<String, f64>) -> Self {
        Self(map)
    }
}

// =============================================================================
// Comparison
// =============================================================================

/// One metric present on both sides, with the peer's relative difference.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricComparison {
    pub name: String,
    pub local: f64,
    pub peer: f64,
    /// `(peer - local) / local * 100`, or 0 when `local` is 0.
    pub percent_diff: f64,
}

impl MetricComparison {
    /// True if the difference exceeds [`SIGNIFICANT_DIFF_PERCENT`].
    pub fn is_significant(&self) -> bool {
        self.percent_diff.abs() > SIGNIFICANT_DIFF_PERCENT
    }
}

/// Compares every metric present in both snapshots.
///
/// Non-finite values on either side are skipped.
///
/// ## Example
/// ```rust
/// use sibling_core::metrics::{compare, MetricsSnapshot};
///
/// let local = MetricsSnapshot::new().with("accuracy_score", 0.8);
/// let peer = MetricsSnapshot::new().with("accuracy_score", 0.9);
/// let diffs = compare(&local, &peer);
/// assert_eq!(diffs.len(), 1);
/// assert!(diffs[0].is_significant());
/// ```
pub fn compare(local: &MetricsSnapshot, peer: &MetricsSnapshot) -> Vec<MetricComparison> {
    peer.iter()
        .filter_map(|(name, peer_value)| {
            let local_value = local.get(name)?;
            if !local_value.is_finite() || !peer_value.is_finite() {
                return None;
            }
            let percent_diff = if local_value != 0.0 {
                (peer_value - local_value) / local_value * 100.0
            } else {
                0.0
            };
            Some(MetricComparison {
                name: name.to_string(),
                local: local_value,
                peer: peer_value,
                percent_diff,
            })
        })
        .collect()
}
