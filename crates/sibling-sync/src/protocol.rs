//! # Sync Protocol Messages
//!
//! Message types exchanged with the peer instance.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Sync Protocol Messages                             │
//! │                                                                         │
//! │  KNOWLEDGE                                                              │
//! │  ─────────                                                              │
//! │  local ───► ConceptSync { concepts: [ConceptRecord; ≤ batch_size] }     │
//! │                                                                         │
//! │  PERFORMANCE                                                            │
//! │  ───────────                                                            │
//! │  local ───► MetricsSync { metrics: { name: number } }                   │
//! │                                                                         │
//! │  LIVENESS                                                               │
//! │  ────────                                                               │
//! │  local ───► StatusSync { status: StatusSnapshot }                       │
//! │                                                                         │
//! │  Every message is wrapped in a SignedEnvelope; the listener answers     │
//! │  each envelope with a PeerAck frame.                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Messages are internally tagged JSON, wrapped in an envelope:
//! ```json
//! {
//!   "message": { "type": "status_sync", "timestamp": 1700000000,
//!                "source": "sibling-v1", "status": { ... } },
//!   "signature": "9f2c...",
//!   "timestamp": 1700000001
//! }
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sibling_core::{ConceptRecord, MetricsSnapshot, StatusSnapshot};

use crate::error::{SyncError, SyncResult};

/// Seconds since the Unix epoch.
pub fn now_epoch() -> i64 {
    Utc::now().timestamp()
}

// =============================================================================
// Main Message Enum (Tagged Union)
// =============================================================================

/// All sync protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    /// A batch of learned concepts.
    ConceptSync {
        timestamp: i64,
        source: String,
        concepts: Vec<ConceptRecord>,
    },

    /// The sender's performance metrics.
    MetricsSync {
        timestamp: i64,
        source: String,
        metrics: MetricsSnapshot,
    },

    /// The sender's liveness summary.
    StatusSync {
        timestamp: i64,
        source: String,
        status: StatusSnapshot,
    },
}

impl SyncMessage {
    /// Returns the wire tag of this message.
    pub fn type_name(&self) -> &'static str {
        match self {
            SyncMessage::ConceptSync { .. } => "concept_sync",
            SyncMessage::MetricsSync { .. } => "metrics_sync",
            SyncMessage::StatusSync { .. } => "status_sync",
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            SyncMessage::ConceptSync { timestamp, .. }
            | SyncMessage::MetricsSync { timestamp, .. }
            | SyncMessage::StatusSync { timestamp, .. } => *timestamp,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            SyncMessage::ConceptSync { source, .. }
            | SyncMessage::MetricsSync { source, .. }
            | SyncMessage::StatusSync { source, .. } => source,
        }
    }

    // =========================================================================
    // Message Constructors
    // =========================================================================

    pub fn concept_sync(source: &str, concepts: Vec<ConceptRecord>) -> Self {
        SyncMessage::ConceptSync {
            timestamp: now_epoch(),
            source: source.to_string(),
            concepts,
        }
    }

    pub fn metrics_sync(source: &str, metrics: MetricsSnapshot) -> Self {
        SyncMessage::MetricsSync {
            timestamp: now_epoch(),
            source: source.to_string(),
            metrics,
        }
    }

    pub fn status_sync(source: &str, status: StatusSnapshot) -> Self {
        SyncMessage::StatusSync {
            timestamp: now_epoch(),
            source: source.to_string(),
            status,
        }
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// A message plus its HMAC and send time.
///
/// Use [`to_wire`](Self::to_wire) to encode: it goes through
/// `serde_json::Value` so the bytes on the wire re-encode to the exact
/// canonical form the signature was computed over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub message: SyncMessage,
    /// Lowercase hex HMAC-SHA256 of the canonical message JSON.
    pub signature: String,
    /// Seconds since epoch when the envelope was signed.
    pub timestamp: i64,
}

impl SignedEnvelope {
    /// Serializes the envelope for transmission or storage.
    pub fn to_wire(&self) -> SyncResult<String> {
        Ok(serde_json::to_value(self)?.to_string())
    }

    /// Decodes an envelope whose signature has already been checked.
    ///
    /// ## Errors
    /// `SyncError::MalformedMessage` for an unknown `type` or a payload of
    /// the wrong shape.
    pub fn from_value(value: serde_json::Value) -> SyncResult<Self> {
        serde_json::from_value(value).map_err(|e| SyncError::MalformedMessage(e.to_string()))
    }

    /// Parses raw envelope text into untyped JSON.
    pub fn parse_raw(raw: &str) -> SyncResult<serde_json::Value> {
        serde_json::from_str(raw).map_err(|e| SyncError::MalformedMessage(e.to_string()))
    }
}

// =============================================================================
// Acknowledgement
// =============================================================================

/// The listener's answer to one delivered envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerAck {
    /// True if the envelope was durably logged.
    pub accepted: bool,

    /// Row id of the logged envelope on the receiving side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PeerAck {
    pub fn accepted(log_id: i64) -> Self {
        PeerAck {
            accepted: true,
            log_id: Some(log_id),
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        PeerAck {
            accepted: false,
            log_id: None,
            reason: Some(reason.into()),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
