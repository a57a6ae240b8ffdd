//! # Sync Log Repository
//!
//! Every envelope sent to or received from the peer.
//!
//! ## Two Roles, One Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         sync_log                                        │
//! │                                                                         │
//! │  direction = outgoing           direction = incoming                    │
//! │  ─────────────────────          ─────────────────────                   │
//! │  Audit trail: one row per       Inbox: written by receive() with        │
//! │  delivery attempt, success      processed = 0, flipped to 1 exactly     │
//! │  or failure                     once by the ingest step                 │
//! │                                                                         │
//! │  Ingest order: timestamp ASC, id ASC                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sibling_core::{Direction, SyncLogEntry};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;

const SELECT_COLUMNS: &str =
    "SELECT id, direction, message, timestamp, processed, outcome FROM sync_log";

/// Repository for sync log operations.
#[derive(Debug, Clone)]
pub struct SyncLogRepository {
    pool: SqlitePool,
}

impl SyncLogRepository {
    /// Creates a new SyncLogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncLogRepository { pool }
    }

    /// Appends a row stamped with the current time. Returns the row id.
    pub async fn append(
        &self,
        direction: Direction,
        message: &str,
        processed: bool,
    ) -> DbResult<i64> {
        self.append_at(direction, message, processed, Utc::now().timestamp())
            .await
    }

    /// Appends a row with an explicit timestamp.
    pub async fn append_at(
        &self,
        direction: Direction,
        message: &str,
        processed: bool,
        timestamp: i64,
    ) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO sync_log (direction, message, timestamp, processed)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(direction)
        .bind(message)
        .bind(timestamp)
        .bind(processed)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(id, direction = %direction, "Sync log row appended");
        Ok(id)
    }

    /// Incoming rows not yet processed, oldest first.
    pub async fn pending_incoming(&self) -> DbResult<Vec<SyncLogEntry>> {
        let sql = format!(
            "{} WHERE direction = ?1 AND processed = 0 ORDER BY timestamp ASC, id ASC",
            SELECT_COLUMNS
        );

        let entries = sqlx::query_as::<_, SyncLogEntry>(&sql)
            .bind(Direction::Incoming)
            .fetch_all(&self.pool)
            .await?;

        Ok(entries)
    }

    /// Flips `processed` to true and records the outcome.
    ///
    /// Only unprocessed rows are touched, so a second call is a no-op and
    /// returns false.
    pub async fn mark_processed(&self, id: i64, outcome: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_log SET
                processed = 1,
                outcome = ?2
            WHERE id = ?1 AND processed = 0
            "#,
        )
        .bind(id)
        .bind(outcome)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Most recent rows in either direction, newest first.
    pub async fn recent(&self, limit: u32) -> DbResult<Vec<SyncLogEntry>> {
        let sql = format!("{} ORDER BY timestamp DESC, id DESC LIMIT ?1", SELECT_COLUMNS);

        let entries = sqlx::query_as::<_, SyncLogEntry>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(entries)
    }

    /// Fetches one row by id.
    pub async fn get(&self, id: i64) -> DbResult<Option<SyncLogEntry>> {
        let sql = format!("{} WHERE id = ?1", SELECT_COLUMNS);

        let entry = sqlx::query_as::<_, SyncLogEntry>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(entry)
    }

    /// Counts rows in one direction.
    pub async fn count(&self, direction: Direction) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_log WHERE direction = ?1")
            .bind(direction)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
