//! # Repository Module
//!
//! Database repository implementations for the sibling store.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Access                                    │
//! │                                                                         │
//! │  SyncStore impl (sibling-sync)                                          │
//! │       │                                                                 │
//! │       │  db.concepts().find_by_text("ownership")                        │
//! │       ▼                                                                 │
//! │  ConceptRepository                                                      │
//! │  ├── since(&self, ts)                                                   │
//! │  ├── find_by_text(&self, text)                                          │
//! │  ├── insert(&self, record, source)                                      │
//! │  └── update_from_sync(&self, record, source)                            │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ConceptRepository`](concept::ConceptRepository) - Learned concepts keyed by text
//! - [`SyncLogRepository`](sync_log::SyncLogRepository) - Envelope audit log and inbox
//! - [`PeerRepository`](peer::PeerRepository) - Peer metrics and status time series
//! - [`BudgetRepository`](budget::BudgetRepository) - Remaining token balance

pub mod budget;
pub mod concept;
pub mod peer;
pub mod sync_log;
