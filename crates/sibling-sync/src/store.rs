//! # Sync Store
//!
//! The persistence contract the engine depends on. The engine never touches
//! SQL directly; it talks to a [`SyncStore`], which is implemented here for
//! [`sibling_db::Database`].
//!
//! ## What Lives Where
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SyncStore method             sibling-db repository                     │
//! │  ─────────────────────────    ────────────────────────────────────────  │
//! │  concepts_since               ConceptRepository::since                  │
//! │  find_concept                 ConceptRepository::find_by_text           │
//! │  insert_concept               ConceptRepository::insert                 │
//! │  update_concept               ConceptRepository::update_from_sync       │
//! │  append_sync_log              SyncLogRepository::append                 │
//! │  pending_incoming             SyncLogRepository::pending_incoming       │
//! │  mark_processed               SyncLogRepository::mark_processed         │
//! │  recent_sync_log              SyncLogRepository::recent                 │
//! │  append_peer_metrics/status   PeerRepository                            │
//! │  token_balance                BudgetRepository::balance                 │
//! │  database_size                Database::size_bytes                      │
//! │  last_learning_activity       ConceptRepository::last_created_at        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every call commits on its own. A crash between two calls leaves a state
//! that the next cycle repairs by replaying the unprocessed rows.

use async_trait::async_trait;
use sibling_core::{
    ConceptRecord, Direction, MetricsSnapshot, ProcessOutcome, StatusSnapshot, SyncLogEntry,
};
use sibling_db::Database;

use crate::error::SyncResult;

/// Storage operations used by the sync engine.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Concepts created at or after `timestamp`, oldest first.
    async fn concepts_since(&self, timestamp: i64) -> SyncResult<Vec<ConceptRecord>>;

    async fn find_concept(&self, text: &str) -> SyncResult<Option<ConceptRecord>>;

    async fn insert_concept(&self, record: &ConceptRecord, provenance: &str) -> SyncResult<i64>;

    /// Overwrites the mutable fields of the concept with the same text.
    /// Returns false if no such concept exists.
    async fn update_concept(&self, record: &ConceptRecord, provenance: &str) -> SyncResult<bool>;

    async fn append_sync_log(
        &self,
        direction: Direction,
        raw: &str,
        processed: bool,
    ) -> SyncResult<i64>;

    /// Unprocessed incoming rows, ordered by timestamp then id.
    async fn pending_incoming(&self) -> SyncResult<Vec<SyncLogEntry>>;

    async fn mark_processed(&self, id: i64, outcome: ProcessOutcome) -> SyncResult<()>;

    async fn append_peer_metrics(
        &self,
        source: &str,
        metrics: &MetricsSnapshot,
        timestamp: i64,
    ) -> SyncResult<i64>;

    async fn append_peer_status(
        &self,
        source: &str,
        status: &StatusSnapshot,
        timestamp: i64,
    ) -> SyncResult<i64>;

    async fn token_balance(&self) -> SyncResult<i64>;

    /// Approximate on-disk size in bytes.
    async fn database_size(&self) -> SyncResult<u64>;

    /// Creation time of the newest concept, if any.
    async fn last_learning_activity(&self) -> SyncResult<Option<i64>>;

    /// Most recent log rows in either direction, newest first.
    async fn recent_sync_log(&self, limit: u32) -> SyncResult<Vec<SyncLogEntry>>;
}

// =============================================================================
// SQLite Implementation
// =============================================================================

#[async_trait]
impl SyncStore for Database {
    async fn concepts_since(&self, timestamp: i64) -> SyncResult<Vec<ConceptRecord>> {
        Ok(self.concepts().since(timestamp).await?)
    }

    async fn find_concept(&self, text: &str) -> SyncResult<Option<ConceptRecord>> {
        let stored = self.concepts().find_by_text(text).await?;
        Ok(stored.map(|stored| stored.record))
    }

    async fn insert_concept(&self, record: &ConceptRecord, provenance: &str) -> SyncResult<i64> {
        Ok(self.concepts().insert(record, provenance).await?)
    }

    async fn update_concept(&self, record: &ConceptRecord, provenance: &str) -> SyncResult<bool> {
        Ok(self.concepts().update_from_sync(record, provenance).await?)
    }

    async fn append_sync_log(
        &self,
        direction: Direction,
        raw: &str,
        processed: bool,
    ) -> SyncResult<i64> {
        Ok(self.sync_log().append(direction, raw, processed).await?)
    }

    async fn pending_incoming(&self) -> SyncResult<Vec<SyncLogEntry>> {
        Ok(self.sync_log().pending_incoming().await?)
    }

    async fn mark_processed(&self, id: i64, outcome: ProcessOutcome) -> SyncResult<()> {
        self.sync_log().mark_processed(id, outcome.as_str()).await?;
        Ok(())
    }

    async fn append_peer_metrics(
        &self,
        source: &str,
        metrics: &MetricsSnapshot,
        timestamp: i64,
    ) -> SyncResult<i64> {
        Ok(self.peers().append_metrics(source, metrics, timestamp).await?)
    }

    async fn append_peer_status(
        &self,
        source: &str,
        status: &StatusSnapshot,
        timestamp: i64,
    ) -> SyncResult<i64> {
        Ok(self.peers().append_status(source, status, timestamp).await?)
    }

    async fn token_balance(&self) -> SyncResult<i64> {
        Ok(self.budget().balance().await?)
    }

    async fn database_size(&self) -> SyncResult<u64> {
        Ok(self.size_bytes().await?)
    }

    async fn last_learning_activity(&self) -> SyncResult<Option<i64>> {
        Ok(self.concepts().last_created_at().await?)
    }

    async fn recent_sync_log(&self, limit: u32) -> SyncResult<Vec<SyncLogEntry>> {
        Ok(self.sync_log().recent(limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sibling_db::DbConfig;

    #[tokio::test]
    async fn test_database_store_round_trip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let store: &dyn SyncStore = &db;

        let record = ConceptRecord::new("lifetimes", "topic", 50).with_confidence(0.7);
        store.insert_concept(&record, "local").await.unwrap();

        let found = store.find_concept("lifetimes").await.unwrap().unwrap();
        assert_eq!(found.confidence, 0.7);
        assert_eq!(store.concepts_since(50).await.unwrap().len(), 1);
        assert!(store.concepts_since(51).await.unwrap().is_empty());
        assert_eq!(store.last_learning_activity().await.unwrap(), Some(50));

        let id = store
            .append_sync_log(Direction::Incoming, "{}", false)
            .await
            .unwrap();
        assert_eq!(store.pending_incoming().await.unwrap().len(), 1);

        store
            .mark_processed(id, ProcessOutcome::Malformed)
            .await
            .unwrap();
        assert!(store.pending_incoming().await.unwrap().is_empty());

        let recent = store.recent_sync_log(5).await.unwrap();
        assert_eq!(recent[0].outcome.as_deref(), Some("malformed"));
    }
}
