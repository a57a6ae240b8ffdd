//! # Confidence Module
//!
//! Provides the `Confidence` type used to break ties when the same concept
//! is known to both instances.
//!
//! ## Score Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  confidence = clamp(BASE + usage_bonus + validation_bonus, 0.0, 1.0)    │
//! │                                                                         │
//! │   0.0 ─────────────── 0.5 ──────────────────────────── 1.0              │
//! │                        ▲                                                │
//! │                       BASE (freshly learned concept)                    │
//! │                                                                         │
//! │  • Bonuses are non-negative: a score never drops below BASE through    │
//! │    `with_bonus`                                                         │
//! │  • Any input is clamped to [0, 1]; NaN collapses to BASE                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use sibling_core::confidence::Confidence;
//!
//! let c = Confidence::estimate(4, 1);
//! assert!(c > Confidence::base());
//! assert!(c.value() <= 1.0);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Base confidence of any concept before bonuses.
pub const BASE_CONFIDENCE: f64 = 0.5;

/// Bonus per recorded use of a concept.
const USAGE_BONUS_STEP: f64 = 0.05;

/// Cap on the total usage bonus.
const USAGE_BONUS_CAP: f64 = 0.3;

/// Bonus per external validation of a concept.
const VALIDATION_BONUS_STEP: f64 = 0.1;

/// Cap on the total validation bonus.
const VALIDATION_BONUS_CAP: f64 = 0.2;

// =============================================================================
// Confidence Type
// =============================================================================

/// A confidence score bounded to `[0.0, 1.0]`.
///
/// ## Design Decisions
/// - **Clamped on construction**: no code path can hold an out-of-range score
/// - **`PartialOrd` only**: comparisons are strict, so equal scores compare
///   equal and the caller decides who wins ties
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Confidence(f64);

impl Confidence {
    /// Creates a confidence score, clamping into `[0, 1]`.
    ///
    /// NaN is treated as "no information" and maps to [`BASE_CONFIDENCE`].
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Confidence(BASE_CONFIDENCE);
        }
        Confidence(value.clamp(0.0, 1.0))
    }

    /// The base score of a freshly learned concept.
    #[inline]
    pub const fn base() -> Self {
        Confidence(BASE_CONFIDENCE)
    }

    /// Returns the raw score.
    #[inline]
    pub const fn value(&self) -> f64 {
        self.0
    }

    /// Adds a bonus. Negative and NaN bonuses are ignored.
    pub fn with_bonus(self, bonus: f64) -> Self {
        if bonus.is_nan() || bonus <= 0.0 {
            return self;
        }
        Confidence::new(self.0 + bonus)
    }

    /// Estimates a score from usage and validation counts.
    ///
    /// ## Example
    /// ```rust
    /// use sibling_core::confidence::Confidence;
    ///
    /// assert_eq!(Confidence::estimate(0, 0), Confidence::base());
    /// // 0.5 + min(0.3, 10 * 0.05) + min(0.2, 5 * 0.1) = 1.0
    /// assert_eq!(Confidence::estimate(10, 5).value(), 1.0);
    /// ```
    pub fn estimate(usage_count: u32, validation_count: u32) -> Self {
        let usage_bonus = (usage_count as f64 * USAGE_BONUS_STEP).min(USAGE_BONUS_CAP);
        let validation_bonus =
            (validation_count as f64 * VALIDATION_BONUS_STEP).min(VALIDATION_BONUS_CAP);

        Confidence::base()
            .with_bonus(usage_bonus)
            .with_bonus(validation_bonus)
    }

    /// Returns true if `self` should replace `existing` in a merge.
    ///
    /// Strictly greater only: the local copy wins ties.
    #[inline]
    pub fn beats(&self, existing: &Confidence) -> bool {
        self.0 > existing.0
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Confidence::base()
    }
}

impl From<f64> for Confidence {
    fn from(value: f64) -> Self {
        Confidence::new(value)
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamping() {
        assert_eq!(Confidence::new(1.7).value(), 1.0);
        assert_eq!(Confidence::new(-0.2).value(), 0.0);
        assert_eq!(Confidence::new(f64::NAN).value(), BASE_CONFIDENCE);
        assert_eq!(Confidence::new(0.42).value(), 0.42);
    }

    #[test]
    fn test_bonus_is_monotone() {
        let c = Confidence::new(0.6);
        assert_eq!(c.with_bonus(-0.5), c);
        assert_eq!(c.with_bonus(f64::NAN), c);
        assert!(c.with_bonus(0.1) > c);
        assert_eq!(c.with_bonus(10.0).value(), 1.0);
    }

    #[test]
    fn test_estimate_caps() {
        let c = Confidence::estimate(2, 0);
        assert!((c.value() - 0.6).abs() < 1e-9);

        let capped = Confidence::estimate(1000, 1000);
        assert_eq!(capped.value(), 1.0);
    }

    #[test]
    fn test_local_wins_ties() {
        let local = Confidence::new(0.4);
        assert!(!Confidence::new(0.4).beats(&local));
        assert!(Confidence::new(0.9).beats(&local));
        assert!(!Confidence::new(0.3).beats(&local));
    }

    #[test]
    fn test_serializes_as_plain_number() {
        let json = serde_json::to_string(&Confidence::new(0.75)).unwrap();
        assert_eq!(json, "0.75");
    }
}
