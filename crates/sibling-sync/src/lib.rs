//! # sibling-sync: Peer Sync Engine for Sibling
//!
//! This crate keeps two agent instances in step. Each side periodically
//! sends what it has learned, how it is performing and whether it is alive;
//! each side merges what the other sent.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                    SyncEngine (service object)                   │  │
//! │  │                                                                  │  │
//! │  │  Constructed by the host, started once, stopped at shutdown      │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │   SyncCycle    │  │ OutboundQueue  │  │   SyncTransport        │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Gathers local  │  │ FIFO between   │  │ Signs, sends, retries  │    │
//! │  │ data, ingests  │─►│ cycle and the  │─►│ (linear backoff), logs │    │
//! │  │ incoming rows  │  │ drain loop     │  │ every attempt          │    │
//! │  └───────┬────────┘  └────────────────┘  └───────────┬────────────┘    │
//! │          │                                           │                  │
//! │          ▼                                           ▼                  │
//! │  ┌────────────────┐                       ┌────────────────────────┐    │
//! │  │ConflictResolver│                       │  PeerDelivery          │    │
//! │  │ confidence     │                       │  WebSocket / loopback  │    │
//! │  │ merge          │                       └────────────────────────┘    │
//! │  └────────────────┘                                                     │
//! │                                                                         │
//! │  INBOUND: PeerListener (axum ws) ──► SyncEngine::receive ──► sync_log   │
//! │           applied on the next cycle, after signature verification      │
//! │                                                                         │
//! │  SIDE CAR: DebouncedTaskQueue runs background jobs in quiet periods     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`engine`] - `SyncEngine` control surface and background loops
//! - [`cycle`] - One gather/ingest pass
//! - [`resolver`] - Confidence-based concept merge
//! - [`transport`] - Retrying sender and peer delivery implementations
//! - [`queue`] - Outbound message queue
//! - [`signer`] - HMAC-SHA256 signing and verification
//! - [`protocol`] - Wire messages and envelopes
//! - [`store`] - Storage contract, implemented for `sibling_db::Database`
//! - [`metrics`] - Local metrics source
//! - [`listener`] - WebSocket endpoint for the peer
//! - [`tasks`] - Debounced background task queue
//! - [`config`] - Sync configuration
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sibling_sync::{SyncConfig, SyncEngine};
//! use sibling_db::{Database, DbConfig};
//! use std::sync::Arc;
//!
//! let config = SyncConfig::load(None)?;
//! let db = Arc::new(Database::new(DbConfig::new("sibling.db")).await?);
//!
//! let engine = SyncEngine::from_config(config, db)?;
//! engine.start().await?;
//!
//! let status = engine.status().await;
//! println!("Pending: {}", status.pending_outbound);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod cycle;
pub mod engine;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod protocol;
pub mod queue;
pub mod resolver;
pub mod signer;
pub mod store;
pub mod tasks;
pub mod transport;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ListenerSettings, SyncConfig};
pub use cycle::{CyclePhase, CycleReport, IngestOutcome, IngestReport};
pub use engine::{EngineStatus, SyncEngine, SyncState};
pub use error::{SyncError, SyncResult};
pub use listener::{ListenerHandle, PeerListener};
pub use metrics::{MetricsSource, StaticMetrics};
pub use protocol::{PeerAck, SignedEnvelope, SyncMessage};
pub use queue::OutboundQueue;
pub use resolver::{ConceptBatchReport, ConceptOutcome, ConflictResolver};
pub use signer::Signer;
pub use store::SyncStore;
pub use tasks::DebouncedTaskQueue;
pub use transport::{LoopbackDelivery, PeerDelivery, SyncTransport, WebSocketDelivery};
