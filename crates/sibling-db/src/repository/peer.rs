//! # Peer Repository
//!
//! Append-only time series of the metrics and status snapshots a peer
//! reports. Nothing here is merged or deduplicated: each received snapshot
//! becomes one row keyed by `(source, timestamp)`.

use sibling_core::{MetricsSnapshot, PeerMetricsRecord, PeerStatusRecord, StatusSnapshot};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;

#[derive(Debug, sqlx::FromRow)]
struct MetricsRow {
    id: i64,
    source: String,
    metrics: String,
    timestamp: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct StatusRow {
    id: i64,
    source: String,
    status: String,
    timestamp: i64,
}

/// Repository for peer metrics and status.
#[derive(Debug, Clone)]
pub struct PeerRepository {
    pool: SqlitePool,
}

impl PeerRepository {
    /// Creates a new PeerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PeerRepository { pool }
    }

    /// Stores one metrics snapshot. Returns the row id.
    pub async fn append_metrics(
        &self,
        source: &str,
        metrics: &MetricsSnapshot,
        timestamp: i64,
    ) -> DbResult<i64> {
        let payload = serde_json::to_string(metrics)?;

        let result = sqlx::query(
            "INSERT INTO peer_metrics (source, metrics, timestamp) VALUES (?1, ?2, ?3)",
        )
        .bind(source)
        .bind(payload)
        .bind(timestamp)
        .execute(&self.pool)
        .await?;

        debug!(source = %source, timestamp, "Peer metrics stored");
        Ok(result.last_insert_rowid())
    }

    /// Stores one status snapshot. Returns the row id.
    pub async fn append_status(
        &self,
        source: &str,
        status: &StatusSnapshot,
        timestamp: i64,
    ) -> DbResult<i64> {
        let payload = serde_json::to_string(status)?;

        let result =
            sqlx::query("INSERT INTO peer_status (source, status, timestamp) VALUES (?1, ?2, ?3)")
                .bind(source)
                .bind(payload)
                .bind(timestamp)
                .execute(&self.pool)
                .await?;

        debug!(source = %source, timestamp, "Peer status stored");
        Ok(result.last_insert_rowid())
    }

    /// Newest status reported by `source`.
    pub async fn latest_status(&self, source: &str) -> DbResult<Option<PeerStatusRecord>> {
        let row: Option<StatusRow> = sqlx::query_as(
            r#"
            SELECT id, source, status, timestamp FROM peer_status
            WHERE source = ?1
            ORDER BY timestamp DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(source)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> DbResult<PeerStatusRecord> {
            Ok(PeerStatusRecord {
                id: row.id,
                source: row.source,
                status: serde_json::from_str(&row.status)?,
                timestamp: row.timestamp,
            })
        })
        .transpose()
    }

    /// Metrics history for `source`, newest first.
    pub async fn metrics_history(
        &self,
        source: &str,
        limit: u32,
    ) -> DbResult<Vec<PeerMetricsRecord>> {
        let rows: Vec<MetricsRow> = sqlx::query_as(
            r#"
            SELECT id, source, metrics, timestamp FROM peer_metrics
            WHERE source = ?1
            ORDER BY timestamp DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(source)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> DbResult<PeerMetricsRecord> {
                Ok(PeerMetricsRecord {
                    id: row.id,
                    source: row.source,
                    metrics: serde_json::from_str(&row.metrics)?,
                    timestamp: row.timestamp,
                })
            })
            .collect()
    }
}
