//! # sibling-core: Pure Data Model for Sibling
//!
//! This crate holds the types shared by the storage layer and the peer sync
//! engine. Everything here is deterministic and free of I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sibling Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 sibling-sync (engine)                           │   │
//! │  │   SyncCycle ─► OutboundQueue ─► SyncTransport ─► peer           │   │
//! │  │   ConflictResolver ◄── ingest ◄── sync_log (incoming)           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ sibling-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌────────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ confidence │  │  metrics  │  │ validation│  │   │
//! │  │   │ Concept   │  │ [0,1] score│  │ snapshots │  │  records  │  │   │
//! │  │   │ SyncLog   │  │ base + bon.│  │ compare   │  │  checks   │  │   │
//! │  │   └───────────┘  └────────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    sibling-db (Database Layer)                  │   │
//! │  │              SQLite queries, migrations, repositories           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Concept records, sync log entries, status snapshots
//! - [`confidence`] - Bounded confidence score used for merge decisions
//! - [`metrics`] - Performance metric snapshots and peer comparison
//! - [`error`] - Domain error types
//! - [`validation`] - Record validation before storage
//!
//! ## Example Usage
//!
//! ```rust
//! use sibling_core::confidence::Confidence;
//!
//! let local = Confidence::base();
//! let incoming = Confidence::new(0.9);
//! assert!(incoming > local);
//!
//! // Bonuses never push the score past 1.0
//! assert_eq!(Confidence::base().with_bonus(0.8).value(), 1.0);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod confidence;
pub mod error;
pub mod metrics;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use confidence::Confidence;
pub use error::{CoreError, ValidationError};
pub use metrics::{MetricComparison, MetricsSnapshot};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Prefix stored in a concept's provenance when it arrived from a peer.
///
/// A concept received from source `alpha` is stored with source `sync_alpha`.
pub const SYNC_PROVENANCE_PREFIX: &str = "sync_";

/// Provenance of concepts learned by this instance.
pub const LOCAL_PROVENANCE: &str = "local";

/// Token balance reported when no budget row exists yet.
pub const DEFAULT_TOKEN_BALANCE: i64 = 300_000;

/// Maximum length of a concept's text key.
pub const MAX_CONCEPT_TEXT_LEN: usize = 4096;

/// Builds the provenance tag for a concept received from `peer_source`.
pub fn sync_provenance(peer_source: &str) -> String {
    format!("{}{}", SYNC_PROVENANCE_PREFIX, peer_source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_provenance() {
        assert_eq!(sync_provenance("alpha"), "sync_alpha");
    }
}
