//! # Error Types
//!
//! Domain-specific error types for sibling-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  sibling-core errors (this file)                                        │
//! │  ├── CoreError        - Record decoding / domain failures               │
//! │  └── ValidationError  - A record fails a shape check                    │
//! │                                                                         │
//! │  sibling-db errors (separate crate)                                     │
//! │  └── DbError          - Database operation failures                     │
//! │                                                                         │
//! │  sibling-sync errors (separate crate)                                   │
//! │  └── SyncError        - What the engine reports                         │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → SyncError                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A stored value could not be decoded back into its domain type.
    ///
    /// ## When This Occurs
    /// - A `meta` or `embedding` column holds JSON that no longer parses
    /// - A direction column holds an unknown tag
    #[error("Corrupt {field}: {reason}")]
    Corrupt { field: String, reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Record validation errors.
///
/// Raised before a record reaches storage. The sync engine turns these into
/// "skipped" results rather than failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// A float field is NaN or infinite.
    #[error("{field} must be a finite number")]
    NotFinite { field: String },

    /// A float field is outside its allowed interval.
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: String,
        min: f64,
        max: f64,
        value: f64,
    },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
