//! # Conflict Resolver
//!
//! Applies decoded peer messages to the local store.
//!
//! ## Concept Merge Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     incoming ConceptRecord                              │
//! │                              │                                          │
//! │                       valid? ─── no ──► Skipped(reason)                 │
//! │                              │ yes                                      │
//! │                  local concept with same text?                          │
//! │                  │                           │                          │
//! │                 no                          yes                         │
//! │                  │                           │                          │
//! │                  ▼                           ▼                          │
//! │      insert, source = "sync_<peer>"   incoming > local ?                │
//! │             Inserted                  │              │                  │
//! │                                      yes          no (ties too)         │
//! │                                       │              │                  │
//! │                                       ▼              ▼                  │
//! │                           overwrite kind, meta,   Ignored               │
//! │                           embedding, confidence,                        │
//! │                           source   ──► Updated                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Applying the same batch twice leaves the store as it was after the first
//! application: the second pass only ever produces `Ignored`.
//!
//! Metrics and status snapshots are appended as-is, keyed by peer source
//! and message timestamp.

use std::sync::Arc;

use sibling_core::metrics::compare;
use sibling_core::validation::validate_concept;
use sibling_core::{sync_provenance, ConceptRecord, MetricsSnapshot, StatusSnapshot};
use tracing::{debug, info, warn};

use crate::error::SyncResult;
use crate::metrics::MetricsSource;
use crate::store::SyncStore;

/// What happened to one incoming concept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConceptOutcome {
    Inserted,
    Updated,
    /// Local copy kept (equal or higher confidence).
    Ignored,
    /// Record failed validation and was dropped.
    Skipped(String),
}

/// Per-batch tallies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConceptBatchReport {
    pub inserted: usize,
    pub updated: usize,
    pub ignored: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ConceptBatchReport {
    fn record(&mut self, outcome: &ConceptOutcome) {
        match outcome {
            ConceptOutcome::Inserted => self.inserted += 1,
            ConceptOutcome::Updated => self.updated += 1,
            ConceptOutcome::Ignored => self.ignored += 1,
            ConceptOutcome::Skipped(_) => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.ignored + self.skipped + self.failed
    }
}

/// Merges peer data into the local store.
#[derive(Clone)]
pub struct ConflictResolver {
    store: Arc<dyn SyncStore>,
    metrics: Arc<dyn MetricsSource>,
}

impl ConflictResolver {
    pub fn new(store: Arc<dyn SyncStore>, metrics: Arc<dyn MetricsSource>) -> Self {
        ConflictResolver { store, metrics }
    }

    // =========================================================================
    // Concepts
    // =========================================================================

    /// Merges one concept from `peer_source`.
    pub async fn handle_concept(
        &self,
        record: &ConceptRecord,
        peer_source: &str,
    ) -> SyncResult<ConceptOutcome> {
        if let Err(e) = validate_concept(record) {
            warn!(source = %peer_source, error = %e, "Skipping invalid concept");
            return Ok(ConceptOutcome::Skipped(e.to_string()));
        }

        let provenance = sync_provenance(peer_source);

        let Some(existing) = self.store.find_concept(&record.text).await? else {
            self.store.insert_concept(record, &provenance).await?;
            debug!(text = %record.text, source = %peer_source, "Concept inserted from peer");
            return Ok(ConceptOutcome::Inserted);
        };

        if record.score().beats(&existing.score()) {
            self.store.update_concept(record, &provenance).await?;
            debug!(
                text = %record.text,
                from = %existing.score(),
                to = %record.score(),
                "Concept updated from peer"
            );
            Ok(ConceptOutcome::Updated)
        } else {
            Ok(ConceptOutcome::Ignored)
        }
    }

    /// Merges a batch, attempting every item.
    ///
    /// ## Errors
    /// If any item hit a storage error, the first such error is returned
    /// after the whole batch was attempted, so the caller can retry the
    /// batch later.
    pub async fn handle_concepts(
        &self,
        concepts: &[ConceptRecord],
        peer_source: &str,
    ) -> SyncResult<ConceptBatchReport> {
        let mut report = ConceptBatchReport::default();
        let mut first_error = None;

        for record in concepts {
            match self.handle_concept(record, peer_source).await {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    warn!(text = %record.text, error = %e, "Failed to merge concept");
                    report.failed += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        info!(
            source = %peer_source,
            inserted = report.inserted,
            updated = report.updated,
            ignored = report.ignored,
            skipped = report.skipped,
            failed = report.failed,
            "Concept batch merged"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    // =========================================================================
    // Metrics & Status
    // =========================================================================

    /// Stores the peer's metrics and logs large differences from ours.
    pub async fn handle_metrics(
        &self,
        metrics: &MetricsSnapshot,
        peer_source: &str,
        timestamp: i64,
    ) -> SyncResult<()> {
        self.store
            .append_peer_metrics(peer_source, metrics, timestamp)
            .await?;

        let local = self.metrics.snapshot();
        for diff in compare(&local, metrics)
            .into_iter()
            .filter(|diff| diff.is_significant())
        {
            info!(
                metric = %diff.name,
                local = diff.local,
                peer = diff.peer,
                percent_diff = diff.percent_diff,
                "Significant metric difference with peer"
            );
        }

        Ok(())
    }

    pub async fn handle_status(
        &self,
        status: &StatusSnapshot,
        peer_source: &str,
        timestamp: i64,
    ) -> SyncResult<()> {
        self.store
            .append_peer_status(peer_source, status, timestamp)
            .await?;

        info!(
            source = %peer_source,
            version = %status.version,
            uptime = status.uptime,
            active_sessions = status.active_sessions,
            "Peer status received"
        );
        Ok(())
    }
}
