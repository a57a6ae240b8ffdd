//! # sibling-db: Database Layer for Sibling
//!
//! This crate provides the SQLite store behind the sync engine's
//! `SyncStore` contract.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sibling Data Flow                                │
//! │                                                                         │
//! │  sibling-sync (SyncStore impl)                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    sibling-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ ConceptRepo   │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ SyncLogRepo   │    │ 001_init.sql │  │   │
//! │  │   │ Connection    │    │ PeerRepo      │    │              │  │   │
//! │  │   │ Management    │    │ BudgetRepo    │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/sibling.db                                         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sibling_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("sibling.db")).await?;
//! let fresh = db.concepts().since(last_sync).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::budget::BudgetRepository;
pub use repository::concept::{ConceptRepository, StoredConcept};
pub use repository::peer::PeerRepository;
pub use repository::sync_log::SyncLogRepository;
