//! # Domain Types
//!
//! Records exchanged with the peer and persisted by the storage layer.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  ConceptRecord  │   │  SyncLogEntry   │   │ StatusSnapshot  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  text (key)     │   │  direction      │   │  version        │       │
//! │  │  kind, meta     │   │  message (raw)  │   │  uptime         │       │
//! │  │  embedding      │   │  processed      │   │  token_balance  │       │
//! │  │  confidence     │   │  outcome        │   │  database_size  │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐                             │
//! │  │   Direction     │   │ ProcessOutcome  │                             │
//! │  │  Outgoing       │   │  Applied        │                             │
//! │  │  Incoming       │   │  RejectedAuth   │                             │
//! │  └─────────────────┘   │  Malformed      │                             │
//! │                        └─────────────────┘                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! A concept is identified by its exact `text`. The numeric `id` is local to
//! whichever instance produced the record and carries no meaning across
//! the wire.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::confidence::{Confidence, BASE_CONFIDENCE};
use crate::error::CoreError;
use crate::metrics::MetricsSnapshot;

// =============================================================================
// Concept
// =============================================================================

/// A unit of learned knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptRecord {
    #[serde(default)]
    pub id: i64,

    /// Exact-match identity of the concept.
    pub text: String,

    /// Free-form classification (e.g. "entity", "topic").
    #[serde(default)]
    pub kind: String,

    /// Opaque metadata map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Creation time, seconds since epoch.
    pub created_at: i64,

    /// Score in `[0, 1]`; absent on the wire means base confidence.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    BASE_CONFIDENCE
}

impl ConceptRecord {
    /// Creates a record with base confidence and no metadata.
    pub fn new(text: impl Into<String>, kind: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: 0,
            text: text.into(),
            kind: kind.into(),
            meta: None,
            embedding: None,
            created_at,
            confidence: BASE_CONFIDENCE,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// The record's confidence as a clamped score.
    pub fn score(&self) -> Confidence {
        Confidence::new(self.confidence)
    }
}

// =============================================================================
// Sync Log
// =============================================================================

/// Which way an envelope travelled.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outgoing => "outgoing",
            Direction::Incoming => "incoming",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "outgoing" => Ok(Direction::Outgoing),
            "incoming" => Ok(Direction::Incoming),
            other => Err(CoreError::Corrupt {
                field: "direction".to_string(),
                reason: format!("unknown direction '{}'", other),
            }),
        }
    }
}

/// Why an incoming log row was marked processed.
///
/// Rows that failed transiently are never marked, so they have no outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// Verified, decoded and handled.
    Applied,
    /// Signature did not verify; discarded.
    RejectedAuth,
    /// Not a valid envelope or unknown message type; discarded.
    Malformed,
}

impl ProcessOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessOutcome::Applied => "applied",
            ProcessOutcome::RejectedAuth => "rejected_auth",
            ProcessOutcome::Malformed => "malformed",
        }
    }
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted envelope, sent or received.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub id: i64,
    pub direction: Direction,
    /// Raw envelope JSON exactly as sent or received.
    pub message: String,
    /// Seconds since epoch when the row was written.
    pub timestamp: i64,
    pub processed: bool,
    pub outcome: Option<String>,
}

// =============================================================================
// Status
// =============================================================================

/// Liveness and resource summary one instance reports to the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub version: String,
    /// Seconds since the engine started.
    pub uptime: u64,
    pub token_balance: i64,
    pub active_sessions: u32,
    /// Bytes.
    pub database_size: u64,
    /// Creation time of the newest local concept, if any.
    pub last_learning_activity: Option<i64>,
}

// =============================================================================
// Peer Time Series
// =============================================================================

/// One stored metrics snapshot received from a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerMetricsRecord {
    pub id: i64,
    pub source: String,
    pub metrics: MetricsSnapshot,
    pub timestamp: i64,
}

/// One stored status snapshot received from a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerStatusRecord {
    pub id: i64,
    pub source: String,
    pub status: StatusSnapshot,
    pub timestamp: i64,
}
