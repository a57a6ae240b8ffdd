//! Test doubles for the delivery and storage seams.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sibling_core::{
    ConceptRecord, Direction, MetricsSnapshot, ProcessOutcome, StatusSnapshot, SyncLogEntry,
};
use sibling_db::Database;

use crate::error::{SyncError, SyncResult};
use crate::protocol::SignedEnvelope;
use crate::store::SyncStore;
use crate::transport::PeerDelivery;

// =============================================================================
// Scripted Delivery
// =============================================================================

/// Delivery that fails a scripted number of times, then records envelopes.
#[derive(Default)]
pub struct ScriptedDelivery {
    always_fail: AtomicBool,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
    delivered: Mutex<Vec<SignedEnvelope>>,
}

impl ScriptedDelivery {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn always_failing() -> Self {
        let delivery = Self::default();
        delivery.always_fail.store(true, Ordering::SeqCst);
        delivery
    }

    pub fn failing_first(n: usize) -> Self {
        let delivery = Self::default();
        delivery.failures_left.store(n, Ordering::SeqCst);
        delivery
    }

    pub fn set_down(&self, down: bool) {
        self.always_fail.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Envelopes accepted so far, in delivery order.
    pub fn delivered(&self) -> Vec<SignedEnvelope> {
        self.delivered.lock().unwrap().clone()
    }

    /// Removes and returns the accepted envelopes.
    pub fn take_delivered(&self) -> Vec<SignedEnvelope> {
        std::mem::take(&mut *self.delivered.lock().unwrap())
    }
}

#[async_trait]
impl PeerDelivery for ScriptedDelivery {
    async fn deliver(&self, envelope: &SignedEnvelope) -> SyncResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.always_fail.load(Ordering::SeqCst) {
            return Err(SyncError::ConnectionFailed("scripted outage".into()));
        }
        let scripted_failure = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure {
            return Err(SyncError::ConnectionFailed("scripted failure".into()));
        }

        self.delivered.lock().unwrap().push(envelope.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

// =============================================================================
// Flaky Store
// =============================================================================

/// A real database with switchable failures on selected calls.
pub struct FlakyStore {
    inner: Arc<Database>,
    fail_gather: AtomicBool,
    fail_pending: AtomicBool,
    fail_insert_text: Mutex<Option<String>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<Database>) -> Self {
        FlakyStore {
            inner,
            fail_gather: AtomicBool::new(false),
            fail_pending: AtomicBool::new(false),
            fail_insert_text: Mutex::new(None),
        }
    }

    /// Makes `concepts_since` fail.
    pub fn set_fail_gather(&self, fail: bool) {
        self.fail_gather.store(fail, Ordering::SeqCst);
    }

    /// Makes `pending_incoming` fail.
    pub fn set_fail_pending(&self, fail: bool) {
        self.fail_pending.store(fail, Ordering::SeqCst);
    }

    /// Makes inserting the concept with this text fail.
    pub fn fail_inserts_for(&self, text: &str) {
        *self.fail_insert_text.lock().unwrap() = Some(text.to_string());
    }

    fn outage() -> SyncError {
        SyncError::Database("scripted outage".into())
    }
}

#[async_trait]
impl SyncStore for FlakyStore {
    async fn concepts_since(&self, timestamp: i64) -> SyncResult<Vec<ConceptRecord>> {
        if self.fail_gather.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        self.inner.concepts_since(timestamp).await
    }

    async fn find_concept(&self, text: &str) -> SyncResult<Option<ConceptRecord>> {
        self.inner.find_concept(text).await
    }

    async fn insert_concept(&self, record: &ConceptRecord, provenance: &str) -> SyncResult<i64> {
        let failing = self.fail_insert_text.lock().unwrap().clone();
        if failing.as_deref() == Some(record.text.as_str()) {
            return Err(Self::outage());
        }
        self.inner.insert_concept(record, provenance).await
    }

    async fn update_concept(&self, record: &ConceptRecord, provenance: &str) -> SyncResult<bool> {
        self.inner.update_concept(record, provenance).await
    }

    async fn append_sync_log(
        &self,
        direction: Direction,
        raw: &str,
        processed: bool,
    ) -> SyncResult<i64> {
        self.inner.append_sync_log(direction, raw, processed).await
    }

    async fn pending_incoming(&self) -> SyncResult<Vec<SyncLogEntry>> {
        if self.fail_pending.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        self.inner.pending_incoming().await
    }

    async fn mark_processed(&self, id: i64, outcome: ProcessOutcome) -> SyncResult<()> {
        self.inner.mark_processed(id, outcome).await
    }

    async fn append_peer_metrics(
        &self,
        source: &str,
        metrics: &MetricsSnapshot,
        timestamp: i64,
    ) -> SyncResult<i64> {
        self.inner.append_peer_metrics(source, metrics, timestamp).await
    }

    async fn append_peer_status(
        &self,
        source: &str,
        status: &StatusSnapshot,
        timestamp: i64,
    ) -> SyncResult<i64> {
        self.inner.append_peer_status(source, status, timestamp).await
    }

    async fn token_balance(&self) -> SyncResult<i64> {
        self.inner.token_balance().await
    }

    async fn database_size(&self) -> SyncResult<u64> {
        self.inner.database_size().await
    }

    async fn last_learning_activity(&self) -> SyncResult<Option<i64>> {
        self.inner.last_learning_activity().await
    }

    async fn recent_sync_log(&self, limit: u32) -> SyncResult<Vec<SyncLogEntry>> {
        self.inner.recent_sync_log(limit).await
    }
}
