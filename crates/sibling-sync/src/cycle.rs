//! # Sync Cycle
//!
//! One pass of the sync protocol.
//!
//! ## Phases
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Idle ──► Gathering ──► Draining ──► Ingesting ──► Idle                │
//! │                                                                         │
//! │   GATHERING   concepts since last sync (batched) ─┐                     │
//! │               local metrics snapshot ─────────────┼──► OutboundQueue    │
//! │               local status snapshot ──────────────┘                     │
//! │                                                                         │
//! │   DRAINING    marker only; the engine's drain loop empties the queue    │
//! │               continuously in the background                            │
//! │                                                                         │
//! │   INGESTING   sync_log (incoming, unprocessed), oldest first:           │
//! │               parse ──► verify ──► decode ──► ConflictResolver          │
//! │                  │         │          │              │                  │
//! │              Malformed  RejectedAuth Malformed    Applied / Failed      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each gathering sub-step runs even if an earlier one failed. A row that
//! fails to apply stays unprocessed and is retried next cycle; rows that can
//! never be applied (bad signature, bad shape) are marked processed with the
//! reason.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use sibling_core::{ProcessOutcome, StatusSnapshot, SyncLogEntry};
use tracing::{debug, error, info, warn};

use crate::engine::RunGuard;
use crate::error::{SyncError, SyncResult};
use crate::metrics::MetricsSource;
use crate::protocol::{now_epoch, SyncMessage};
use crate::queue::OutboundQueue;
use crate::resolver::ConflictResolver;
use crate::signer::Signer;
use crate::store::SyncStore;

// =============================================================================
// Cycle Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Gathering,
    Draining,
    Ingesting,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CyclePhase::Idle => write!(f, "idle"),
            CyclePhase::Gathering => write!(f, "gathering"),
            CyclePhase::Draining => write!(f, "draining"),
            CyclePhase::Ingesting => write!(f, "ingesting"),
        }
    }
}

/// Result of ingesting one incoming log row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Applied,
    RejectedAuth,
    Malformed,
    /// Handling failed; the row stays unprocessed.
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub applied: usize,
    pub rejected_auth: usize,
    pub malformed: usize,
    pub failed: usize,
}

impl IngestReport {
    fn record(&mut self, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Applied => self.applied += 1,
            IngestOutcome::RejectedAuth => self.rejected_auth += 1,
            IngestOutcome::Malformed => self.malformed += 1,
            IngestOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.applied + self.rejected_auth + self.malformed + self.failed
    }
}

/// Summary of one cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Wall-clock start, seconds since epoch.
    pub started_at: i64,
    pub concepts_gathered: usize,
    pub messages_queued: usize,
    pub ingest: IngestReport,
    /// Cycle-level failures, in the order they happened.
    pub errors: Vec<SyncError>,
    /// Stopped early because the engine was stopped.
    pub cancelled: bool,
}

impl CycleReport {
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }
}

// =============================================================================
// Sync Cycle
// =============================================================================

pub struct SyncCycle {
    store: Arc<dyn SyncStore>,
    queue: OutboundQueue,
    signer: Signer,
    resolver: ConflictResolver,
    metrics: Arc<dyn MetricsSource>,
    source: String,
    batch_size: usize,
    started: Instant,
    active_sessions: Arc<AtomicU32>,
}

impl SyncCycle {
    pub fn new(
        store: Arc<dyn SyncStore>,
        queue: OutboundQueue,
        signer: Signer,
        metrics: Arc<dyn MetricsSource>,
        source: impl Into<String>,
        batch_size: usize,
        active_sessions: Arc<AtomicU32>,
    ) -> Self {
        let resolver = ConflictResolver::new(store.clone(), metrics.clone());
        SyncCycle {
            store,
            queue,
            signer,
            resolver,
            metrics,
            source: source.into(),
            batch_size: batch_size.max(1),
            started: Instant::now(),
            active_sessions,
        }
    }

    /// Runs gather and ingest for concepts created at or after `since`.
    ///
    /// With a guard, the cycle stops between phases once the guard reports
    /// the engine stopped.
    pub async fn run(&self, since: i64, guard: Option<&RunGuard>) -> CycleReport {
        let mut report = CycleReport {
            started_at: now_epoch(),
            ..Default::default()
        };
        info!(since, "Sync cycle starting");

        self.enter(CyclePhase::Gathering);
        self.gather(since, &mut report).await;
        if Self::cancelled(guard, &mut report).await {
            return report;
        }

        self.enter(CyclePhase::Draining);
        debug!(pending = self.queue.len(), "Outbound queue handed to drain loop");
        if Self::cancelled(guard, &mut report).await {
            return report;
        }

        self.enter(CyclePhase::Ingesting);
        match self.ingest_pending().await {
            Ok(ingest) => report.ingest = ingest,
            Err(e) => {
                error!(error = %e, "Failed to list incoming sync rows");
                report.errors.push(e);
            }
        }

        self.enter(CyclePhase::Idle);
        info!(
            queued = report.messages_queued,
            applied = report.ingest.applied,
            failed_steps = report.errors.len(),
            "Sync cycle finished"
        );
        report
    }

    fn enter(&self, phase: CyclePhase) {
        debug!(%phase, "Sync cycle phase");
    }

    async fn cancelled(guard: Option<&RunGuard>, report: &mut CycleReport) -> bool {
        let Some(guard) = guard else {
            return false;
        };
        if guard.is_active().await {
            return false;
        }
        info!("Sync cycle cancelled by stop request");
        report.cancelled = true;
        true
    }

    // =========================================================================
    // Gathering
    // =========================================================================

    async fn gather(&self, since: i64, report: &mut CycleReport) {
        match self.store.concepts_since(since).await {
            Ok(concepts) => {
                report.concepts_gathered = concepts.len();
                for chunk in concepts.chunks(self.batch_size) {
                    let message = SyncMessage::concept_sync(&self.source, chunk.to_vec());
                    self.push(message, report);
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to gather concepts");
                report.errors.push(e);
            }
        }

        self.push(
            SyncMessage::metrics_sync(&self.source, self.metrics.snapshot()),
            report,
        );

        match self.status_snapshot().await {
            Ok(status) => self.push(SyncMessage::status_sync(&self.source, status), report),
            Err(e) => {
                error!(error = %e, "Failed to gather status");
                report.errors.push(e);
            }
        }
    }

    fn push(&self, message: SyncMessage, report: &mut CycleReport) {
        match self.queue.enqueue(message) {
            Ok(()) => report.messages_queued += 1,
            Err(e) => {
                error!(error = %e, "Failed to queue sync message");
                report.errors.push(e);
            }
        }
    }

    /// The liveness summary sent to the peer.
    pub async fn status_snapshot(&self) -> SyncResult<StatusSnapshot> {
        Ok(StatusSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime: self.started.elapsed().as_secs(),
            token_balance: self.store.token_balance().await?,
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            database_size: self.store.database_size().await?,
            last_learning_activity: self.store.last_learning_activity().await?,
        })
    }

    // =========================================================================
    // Ingesting
    // =========================================================================

    /// Applies every unprocessed incoming row, oldest first.
    pub async fn ingest_pending(&self) -> SyncResult<IngestReport> {
        let rows = self.store.pending_incoming().await?;
        let mut report = IngestReport::default();

        for row in &rows {
            let outcome = self.ingest_row(row).await;
            report.record(&outcome);
        }

        if !rows.is_empty() {
            info!(
                rows = rows.len(),
                applied = report.applied,
                rejected_auth = report.rejected_auth,
                malformed = report.malformed,
                failed = report.failed,
                "Incoming sync rows processed"
            );
        }
        Ok(report)
    }

    async fn ingest_row(&self, row: &SyncLogEntry) -> IngestOutcome {
        let envelope = match self.signer.open(&row.message) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(id = row.id, error = %e, "Discarding sync row");
                let outcome = match e {
                    SyncError::AuthFailure(_) => ProcessOutcome::RejectedAuth,
                    _ => ProcessOutcome::Malformed,
                };
                return self.discard(row.id, outcome).await;
            }
        };

        if let Err(e) = self.dispatch(&envelope.message).await {
            warn!(id = row.id, msg_type = envelope.message.type_name(), error = %e, "Sync row failed, will retry");
            return IngestOutcome::Failed(e.to_string());
        }

        match self.store.mark_processed(row.id, ProcessOutcome::Applied).await {
            Ok(()) => IngestOutcome::Applied,
            Err(e) => IngestOutcome::Failed(e.to_string()),
        }
    }

    async fn discard(&self, id: i64, outcome: ProcessOutcome) -> IngestOutcome {
        if let Err(e) = self.store.mark_processed(id, outcome).await {
            return IngestOutcome::Failed(e.to_string());
        }
        match outcome {
            ProcessOutcome::RejectedAuth => IngestOutcome::RejectedAuth,
            _ => IngestOutcome::Malformed,
        }
    }

    async fn dispatch(&self, message: &SyncMessage) -> SyncResult<()> {
        match message {
            SyncMessage::ConceptSync {
                source, concepts, ..
            } => {
                self.resolver.handle_concepts(concepts, source).await?;
            }
            SyncMessage::MetricsSync {
                timestamp,
                source,
                metrics,
            } => {
                self.resolver
                    .handle_metrics(metrics, source, *timestamp)
                    .await?;
            }
            SyncMessage::StatusSync {
                timestamp,
                source,
                status,
            } => {
                self.resolver.handle_status(status, source, *timestamp).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::StaticMetrics;
    use crate::testing::FlakyStore;
    use sibling_core::{ConceptRecord, Direction};
    use sibling_db::{Database, DbConfig};

    struct Fixture {
        db: Arc<Database>,
        store: Arc<FlakyStore>,
        queue: OutboundQueue,
        cycle: SyncCycle,
    }

    async fn fixture(batch_size: usize) -> Fixture {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let store = Arc::new(FlakyStore::new(db.clone()));
        let queue = OutboundQueue::new();
        let cycle = SyncCycle::new(
            store.clone(),
            queue.clone(),
            Signer::new("secret"),
            Arc::new(StaticMetrics::default()),
            "alpha",
            batch_size,
            Arc::new(AtomicU32::new(2)),
        );
        Fixture {
            db,
            store,
            queue,
            cycle,
        }
    }

    async fn drain_all(queue: &OutboundQueue) -> Vec<SyncMessage> {
        let mut out = Vec::new();
        while let Some(message) = queue.try_drain().await {
            out.push(message);
        }
        out
    }

    #[tokio::test]
    async fn test_gather_batches_concepts() {
        let fx = fixture(2).await;
        for n in 0..5 {
            fx.db
                .concepts()
                .insert(&ConceptRecord::new(format!("c{}", n), "topic", 100 + n), "local")
                .await
                .unwrap();
        }

        let report = fx.cycle.run(0, None).await;
        assert!(report.succeeded());
        assert_eq!(report.concepts_gathered, 5);

        let messages = drain_all(&fx.queue).await;
        let sizes: Vec<usize> = messages
            .iter()
            .filter_map(|m| match m {
                SyncMessage::ConceptSync { concepts, .. } => Some(concepts.len()),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);

        // Metrics and status are always sent
        assert_eq!(messages.len(), 5);
        assert!(messages.iter().any(|m| m.type_name() == "metrics_sync"));
        let status = messages
            .iter()
            .find_map(|m| match m {
                SyncMessage::StatusSync { status, .. } => Some(status.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(status.active_sessions, 2);
        assert_eq!(status.token_balance, 300_000);
        assert_eq!(status.last_learning_activity, Some(104));
    }

    #[tokio::test]
    async fn test_gather_failure_is_isolated() {
        let fx = fixture(10).await;
        fx.store.set_fail_gather(true);

        let report = fx.cycle.run(0, None).await;
        assert!(!report.succeeded());
        assert_eq!(report.errors.len(), 1);

        // Metrics and status still went out
        assert_eq!(report.messages_queued, 2);
        assert_eq!(fx.queue.len(), 2);
    }

    #[tokio::test]
    async fn test_ingest_outcomes() {
        let fx = fixture(10).await;
        let log = fx.db.sync_log();

        let good = Signer::new("secret")
            .sign(SyncMessage::concept_sync(
                "beta",
                vec![ConceptRecord::new("shared", "topic", 5).with_confidence(0.8)],
            ))
            .unwrap();
        let forged = Signer::new("wrong")
            .sign(SyncMessage::concept_sync(
                "beta",
                vec![ConceptRecord::new("forged", "topic", 5)],
            ))
            .unwrap();
        log.append(Direction::Incoming, &good.to_wire().unwrap(), false)
            .await
            .unwrap();
        log.append(Direction::Incoming, &forged.to_wire().unwrap(), false)
            .await
            .unwrap();
        log.append(Direction::Incoming, "not json", false)
            .await
            .unwrap();

        let report = fx.cycle.ingest_pending().await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.rejected_auth, 1);
        assert_eq!(report.malformed, 1);
        assert!(log.pending_incoming().await.unwrap().is_empty());

        let stored = fx.db.concepts().find_by_text("shared").await.unwrap().unwrap();
        assert_eq!(stored.source, "sync_beta");
        assert!(fx.db.concepts().find_by_text("forged").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_signed_unknown_type_is_malformed() {
        let fx = fixture(10).await;
        let message = serde_json::json!({"type": "gossip", "timestamp": 1, "source": "beta"});

        // Sign the raw object by hand: the enum cannot produce this type
        use hmac::Mac;
        let mut mac = hmac::Hmac::<sha2::Sha256>::new_from_slice(b"secret").unwrap();
        mac.update(crate::signer::canonical_json(&message).as_bytes());
        let raw = serde_json::json!({
            "message": message,
            "signature": hex::encode(mac.finalize().into_bytes()),
            "timestamp": 1
        });
        fx.db
            .sync_log()
            .append(Direction::Incoming, &raw.to_string(), false)
            .await
            .unwrap();

        let report = fx.cycle.ingest_pending().await.unwrap();
        assert_eq!(report.malformed, 1);
        let rows = fx.db.sync_log().recent(1).await.unwrap();
        assert_eq!(rows[0].outcome.as_deref(), Some("malformed"));
    }

    #[tokio::test]
    async fn test_failed_row_stays_pending() {
        let fx = fixture(10).await;
        fx.store.fail_inserts_for("flaky");

        let envelope = Signer::new("secret")
            .sign(SyncMessage::concept_sync(
                "beta",
                vec![ConceptRecord::new("flaky", "topic", 5)],
            ))
            .unwrap();
        fx.db
            .sync_log()
            .append(Direction::Incoming, &envelope.to_wire().unwrap(), false)
            .await
            .unwrap();

        let report = fx.cycle.ingest_pending().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(fx.db.sync_log().pending_incoming().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_listing_failure_fails_cycle() {
        let fx = fixture(10).await;
        fx.store.set_fail_pending(true);

        let report = fx.cycle.run(0, None).await;
        assert!(!report.succeeded());
        assert_eq!(report.ingest.total(), 0);
    }

    #[tokio::test]
    async fn test_stopped_engine_cancels_before_ingest() {
        let fx = fixture(10).await;
        let envelope = Signer::new("secret")
            .sign(SyncMessage::metrics_sync("beta", sibling_core::MetricsSnapshot::baseline()))
            .unwrap();
        fx.db
            .sync_log()
            .append(Direction::Incoming, &envelope.to_wire().unwrap(), false)
            .await
            .unwrap();

        let state = crate::engine::SyncState {
            is_running: true,
            generation: 2,
            ..Default::default()
        };
        let stale = RunGuard::new(Arc::new(tokio::sync::RwLock::new(state)), 1);

        let report = fx.cycle.run(0, Some(&stale)).await;
        assert!(report.cancelled);
        assert!(!report.succeeded());
        assert!(report.errors.is_empty());
        assert_eq!(report.ingest.total(), 0);

        // Gathering finished before the check; the incoming row is untouched
        assert_eq!(report.messages_queued, 2);
        assert_eq!(fx.db.sync_log().pending_incoming().await.unwrap().len(), 1);
    }
}
