//! # Concept Repository
//!
//! Learned concepts, unique by exact text.
//!
//! ## Columns
//! ```text
//! concepts
//! ├── id          INTEGER   local row id
//! ├── text        TEXT      UNIQUE identity
//! ├── kind        TEXT
//! ├── meta        TEXT      JSON object or NULL
//! ├── embedding   TEXT      JSON float array or NULL
//! ├── created_at  INTEGER   seconds since epoch
//! ├── confidence  REAL      [0, 1], default 0.5
//! └── source      TEXT      "local" or "sync_<peer>"
//! ```

use sibling_core::{Confidence, ConceptRecord};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Raw row as stored; JSON columns still encoded.
#[derive(Debug, sqlx::FromRow)]
struct ConceptRow {
    id: i64,
    text: String,
    kind: String,
    meta: Option<String>,
    embedding: Option<String>,
    created_at: i64,
    confidence: f64,
    source: String,
}

impl ConceptRow {
    fn into_stored(self) -> DbResult<StoredConcept> {
        let meta: Option<serde_json::Value> = self
            .meta
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let embedding: Option<Vec<f32>> = self
            .embedding
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(StoredConcept {
            record: ConceptRecord {
                id: self.id,
                text: self.text,
                kind: self.kind,
                meta,
                embedding,
                created_at: self.created_at,
                confidence: self.confidence,
            },
            source: self.source,
        })
    }
}

/// A concept together with its provenance tag.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredConcept {
    pub record: ConceptRecord,
    pub source: String,
}

const SELECT_COLUMNS: &str =
    "SELECT id, text, kind, meta, embedding, created_at, confidence, source FROM concepts";

fn encode_json<T: serde::Serialize>(value: Option<&T>) -> DbResult<Option<String>> {
    value
        .map(serde_json::to_string)
        .transpose()
        .map_err(DbError::from)
}

/// Repository for concept operations.
#[derive(Debug, Clone)]
pub struct ConceptRepository {
    pool: SqlitePool,
}

impl ConceptRepository {
    /// Creates a new ConceptRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ConceptRepository { pool }
    }

    /// Concepts created at or after `timestamp`, oldest first.
    ///
    /// The bound is inclusive: a concept created in the same second a cycle
    /// started is sent again on the next cycle.
    pub async fn since(&self, timestamp: i64) -> DbResult<Vec<ConceptRecord>> {
        let sql = format!(
            "{} WHERE created_at >= ?1 ORDER BY created_at ASC, id ASC",
            SELECT_COLUMNS
        );

        let rows: Vec<ConceptRow> = sqlx::query_as(&sql)
            .bind(timestamp)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| row.into_stored().map(|stored| stored.record))
            .collect()
    }

    /// Looks up a concept by exact text.
    pub async fn find_by_text(&self, text: &str) -> DbResult<Option<StoredConcept>> {
        let sql = format!("{} WHERE text = ?1", SELECT_COLUMNS);

        let row: Option<ConceptRow> = sqlx::query_as(&sql)
            .bind(text)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ConceptRow::into_stored).transpose()
    }

    /// Inserts a new concept and returns its row id.
    ///
    /// ## Errors
    /// `DbError::UniqueViolation` if a concept with the same text exists.
    pub async fn insert(&self, record: &ConceptRecord, source: &str) -> DbResult<i64> {
        debug!(text = %record.text, source = %source, "Inserting concept");

        let result = sqlx::query(
            r#"
            INSERT INTO concepts (text, kind, meta, embedding, created_at, confidence, source)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&record.text)
        .bind(&record.kind)
        .bind(encode_json(record.meta.as_ref())?)
        .bind(encode_json(record.embedding.as_ref())?)
        .bind(record.created_at)
        .bind(Confidence::new(record.confidence).value())
        .bind(source)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::UniqueViolation {
                field,
                value: record.text.clone(),
            },
            other => other,
        })?;

        Ok(result.last_insert_rowid())
    }

    /// Overwrites the mutable fields of the concept with the same text.
    ///
    /// `text` and `created_at` are kept. Returns false if no row matched.
    pub async fn update_from_sync(&self, record: &ConceptRecord, source: &str) -> DbResult<bool> {
        debug!(text = %record.text, source = %source, "Updating concept from sync");

        let result = sqlx::query(
            r#"
            UPDATE concepts SET
                kind = ?2,
                meta = ?3,
                embedding = ?4,
                confidence = ?5,
                source = ?6
            WHERE text = ?1
            "#,
        )
        .bind(&record.text)
        .bind(&record.kind)
        .bind(encode_json(record.meta.as_ref())?)
        .bind(encode_json(record.embedding.as_ref())?)
        .bind(Confidence::new(record.confidence).value())
        .bind(source)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Adds a non-negative bonus to a concept's confidence.
    ///
    /// Returns the new score, or `None` if the concept doesn't exist.
    pub async fn reinforce(&self, text: &str, bonus: f64) -> DbResult<Option<Confidence>> {
        let current: Option<f64> =
            sqlx::query_scalar("SELECT confidence FROM concepts WHERE text = ?1")
                .bind(text)
                .fetch_optional(&self.pool)
                .await?;

        let Some(current) = current else {
            return Ok(None);
        };

        let next = Confidence::new(current).with_bonus(bonus);

        sqlx::query("UPDATE concepts SET confidence = ?2 WHERE text = ?1")
            .bind(text)
            .bind(next.value())
            .execute(&self.pool)
            .await?;

        Ok(Some(next))
    }

    /// Creation time of the newest concept, if any.
    pub async fn last_created_at(&self) -> DbResult<Option<i64>> {
        let ts: Option<i64> = sqlx::query_scalar("SELECT MAX(created_at) FROM concepts")
            .fetch_one(&self.pool)
            .await?;

        Ok(ts)
    }

    /// Counts all concepts.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM concepts")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};

    use super::*;

    async fn repo() -> ConceptRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().concepts()
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let repo = repo().await;
        let record = ConceptRecord::new("ownership", "topic", 100)
            .with_confidence(0.7)
            .with_meta(serde_json::json!({"lang": "rust"}))
            .with_embedding(vec![0.25, 0.5]);

        let id = repo.insert(&record, "local").await.unwrap();
        assert!(id > 0);

        let stored = repo.find_by_text("ownership").await.unwrap().unwrap();
        assert_eq!(stored.source, "local");
        assert_eq!(stored.record.confidence, 0.7);
        assert_eq!(stored.record.embedding, Some(vec![0.25, 0.5]));
        assert_eq!(stored.record.meta, Some(serde_json::json!({"lang": "rust"})));

        assert!(repo.find_by_text("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_text_rejected() {
        let repo = repo().await;
        let record = ConceptRecord::new("lifetimes", "topic", 1);
        repo.insert(&record, "local").await.unwrap();

        let err = repo.insert(&record, "local").await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { ref value, .. } if value == "lifetimes"));
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_since_is_inclusive_and_ordered() {
        let repo = repo().await;
        repo.insert(&ConceptRecord::new("c", "t", 30), "local").await.unwrap();
        repo.insert(&ConceptRecord::new("a", "t", 10), "local").await.unwrap();
        repo.insert(&ConceptRecord::new("b", "t", 20), "local").await.unwrap();

        let texts: Vec<String> = repo
            .since(20)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.text)
            .collect();
        assert_eq!(texts, vec!["b", "c"]);
        assert_eq!(repo.last_created_at().await.unwrap(), Some(30));
    }

    #[tokio::test]
    async fn test_update_keeps_text_and_created_at() {
        let repo = repo().await;
        repo.insert(&ConceptRecord::new("traits", "topic", 5).with_confidence(0.4), "local")
            .await
            .unwrap();

        let incoming = ConceptRecord::new("traits", "entity", 99).with_confidence(0.9);
        assert!(repo.update_from_sync(&incoming, "sync_beta").await.unwrap());

        let stored = repo.find_by_text("traits").await.unwrap().unwrap();
        assert_eq!(stored.record.kind, "entity");
        assert_eq!(stored.record.confidence, 0.9);
        assert_eq!(stored.record.created_at, 5);
        assert_eq!(stored.source, "sync_beta");

        let ghost = ConceptRecord::new("ghost", "topic", 1);
        assert!(!repo.update_from_sync(&ghost, "sync_beta").await.unwrap());
    }

    #[tokio::test]
    async fn test_reinforce_caps_at_one() {
        let repo = repo().await;
        repo.insert(&ConceptRecord::new("async", "topic", 1), "local")
            .await
            .unwrap();

        let c = repo.reinforce("async", 0.2).await.unwrap().unwrap();
        assert!((c.value() - 0.7).abs() < 1e-9);

        let c = repo.reinforce("async", 5.0).await.unwrap().unwrap();
        assert_eq!(c.value(), 1.0);

        assert!(repo.reinforce("nope", 0.1).await.unwrap().is_none());
    }
}
