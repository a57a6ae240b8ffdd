//! # Sync Engine
//!
//! The service object hosts construct once and keep. It owns the outbound
//! queue, the transport, the cycle and two background loops.
//!
//! ## Engine Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           SyncEngine                                    │
//! │                                                                         │
//! │  ┌──────────────────────────┐        ┌──────────────────────────────┐  │
//! │  │      Trigger Loop        │        │         Drain Loop           │  │
//! │  │                          │        │                              │  │
//! │  │  loop while running:     │        │  loop while running:         │  │
//! │  │    cycle.run(last_sync)  │ queue  │    queue.drain(10s)          │  │
//! │  │    ok   → sleep interval │ ─────► │    signer.sign(message)      │  │
//! │  │    fail → sleep backoff  │        │    transport.send(envelope)  │  │
//! │  │    (stop() wakes early)  │        │                              │  │
//! │  └──────────────────────────┘        └──────────────────────────────┘  │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  SyncState (RwLock)                                              │  │
//! │  │  last_sync_timestamp • is_running • generation • error_count     │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  CONTROL SURFACE                                                       │
//! │  start() • stop() • trigger_once() • status() • receive(raw)           │
//! │  receive_envelope() • set_active_sessions() • drain_now()              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Stopping
//! `stop()` clears `is_running`, bumps the generation and wakes sleeping
//! loops. Loops notice at their next check; an envelope already being sent
//! finishes its retries first. Loops from an older generation never resume,
//! even if the engine is started again before they exit.

use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, error, info, warn};

use sibling_core::{Direction, SyncLogEntry};

use crate::config::SyncConfig;
use crate::cycle::{CycleReport, SyncCycle};
use crate::error::{SyncError, SyncResult};
use crate::metrics::{MetricsSource, StaticMetrics};
use crate::protocol::{now_epoch, SignedEnvelope, SyncMessage};
use crate::queue::OutboundQueue;
use crate::signer::Signer;
use crate::store::SyncStore;
use crate::transport::{delivery_for, PeerDelivery, SyncTransport};

// =============================================================================
// State
// =============================================================================

/// Mutable engine state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    /// Concepts created at or after this time are sent next cycle.
    pub last_sync_timestamp: i64,
    pub is_running: bool,
    /// Bumped by every start and stop.
    pub generation: u64,
    /// Start time of the most recent cycle, successful or not.
    pub last_attempt: Option<i64>,
    /// Failed cycles plus envelopes that exhausted their retries.
    pub error_count: u64,
}

/// Read model for hosts and the listener's status route.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub enabled: bool,
    pub running: bool,
    pub last_sync: Option<i64>,
    pub last_successful_sync: Option<i64>,
    pub error_count: u64,
    pub pending_outbound: usize,
    pub recent_activity: Vec<SyncLogEntry>,
}

/// Ties a background loop to the generation that spawned it.
#[derive(Clone)]
pub struct RunGuard {
    state: Arc<RwLock<SyncState>>,
    generation: u64,
}

impl RunGuard {
    pub(crate) fn new(state: Arc<RwLock<SyncState>>, generation: u64) -> Self {
        RunGuard { state, generation }
    }

    pub async fn is_active(&self) -> bool {
        let state = self.state.read().await;
        state.is_running && state.generation == self.generation
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

struct EngineInner {
    config: SyncConfig,
    store: Arc<dyn SyncStore>,
    signer: Signer,
    queue: OutboundQueue,
    transport: SyncTransport,
    cycle: SyncCycle,
    state: Arc<RwLock<SyncState>>,
    wake: Notify,
    cycle_lock: Mutex<()>,
    active_sessions: Arc<AtomicU32>,
}

/// Peer sync service. Cheap to clone; clones share one engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Builds an engine with explicit delivery and metrics.
    ///
    /// ## Errors
    /// Any configuration error reported by [`SyncConfig::validate`].
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn SyncStore>,
        delivery: Arc<dyn PeerDelivery>,
        metrics: Arc<dyn MetricsSource>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let signer = Signer::new(&config.peer.shared_secret);
        let queue = OutboundQueue::new();
        let active_sessions = Arc::new(AtomicU32::new(0));
        let transport = SyncTransport::new(delivery, store.clone(), &config);
        let cycle = SyncCycle::new(
            store.clone(),
            queue.clone(),
            signer.clone(),
            metrics,
            config.source(),
            config.sync.batch_size,
            active_sessions.clone(),
        );

        Ok(SyncEngine {
            inner: Arc::new(EngineInner {
                config,
                store,
                signer,
                queue,
                transport,
                cycle,
                state: Arc::new(RwLock::new(SyncState::default())),
                wake: Notify::new(),
                cycle_lock: Mutex::new(()),
                active_sessions,
            }),
        })
    }

    /// Builds an engine whose delivery follows the configured peer URL and
    /// whose metrics are the static baseline.
    pub fn from_config(config: SyncConfig, store: Arc<dyn SyncStore>) -> SyncResult<Self> {
        let delivery = delivery_for(&config);
        Self::new(config, store, delivery, Arc::new(StaticMetrics::default()))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub async fn state(&self) -> SyncState {
        self.inner.state.read().await.clone()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawns the trigger and drain loops. A second call while running does
    /// nothing.
    pub async fn start(&self) -> SyncResult<()> {
        if !self.inner.config.sync.enabled {
            info!("Peer sync disabled by configuration");
            return Ok(());
        }

        let guard = {
            let mut state = self.inner.state.write().await;
            if state.is_running {
                debug!("Sync engine already running");
                return Ok(());
            }
            state.is_running = true;
            state.generation += 1;
            RunGuard::new(self.inner.state.clone(), state.generation)
        };

        info!(
            source = %self.inner.config.source(),
            interval_secs = self.inner.config.sync.interval_secs,
            generation = guard.generation,
            "Sync engine starting"
        );

        tokio::spawn(self.clone().trigger_loop(guard.clone()));
        tokio::spawn(self.clone().drain_loop(guard));
        Ok(())
    }

    /// Asks both loops to exit.
    pub async fn stop(&self) {
        {
            let mut state = self.inner.state.write().await;
            if !state.is_running {
                return;
            }
            state.is_running = false;
            state.generation += 1;
        }
        self.inner.wake.notify_waiters();
        info!("Sync engine stopping");
    }

    async fn trigger_loop(self, guard: RunGuard) {
        loop {
            let notified = self.inner.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !guard.is_active().await {
                break;
            }

            let delay = match self.run_cycle(Some(&guard)).await {
                Ok(report) if report.cancelled => break,
                Ok(_) => self.inner.config.interval(),
                Err(_) => self.inner.config.error_backoff(),
            };
            debug!(?delay, "Next sync cycle scheduled");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut notified => {}
            }
        }
        info!(generation = guard.generation, "Sync trigger loop stopped");
    }

    async fn drain_loop(self, guard: RunGuard) {
        let timeout = self.inner.config.drain_timeout();
        loop {
            let notified = self.inner.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !guard.is_active().await {
                break;
            }

            // Receiving is cancel-safe, so a stop never loses a message
            let next = tokio::select! {
                next = self.inner.queue.drain(timeout) => next,
                _ = &mut notified => None,
            };
            if let Some(message) = next {
                self.send_message(message).await;
            }
        }
        info!(generation = guard.generation, "Sync drain loop stopped");
    }

    // =========================================================================
    // Cycles
    // =========================================================================

    /// Runs one cycle now, whether or not the loops are running.
    ///
    /// ## Errors
    /// The first cycle-level failure. A failed cycle leaves
    /// `last_sync_timestamp` unchanged.
    pub async fn trigger_once(&self) -> SyncResult<CycleReport> {
        self.run_cycle(None).await
    }

    async fn run_cycle(&self, guard: Option<&RunGuard>) -> SyncResult<CycleReport> {
        let _serial = self.inner.cycle_lock.lock().await;

        let since = self.inner.state.read().await.last_sync_timestamp;
        let mut report = self.inner.cycle.run(since, guard).await;

        let mut state = self.inner.state.write().await;
        state.last_attempt = Some(report.started_at);

        let mut errors = std::mem::take(&mut report.errors).into_iter();
        let Some(first) = errors.next() else {
            if !report.cancelled {
                state.last_sync_timestamp = state.last_sync_timestamp.max(report.started_at);
            }
            return Ok(report);
        };

        state.error_count += 1;
        warn!(
            error = %first,
            further_errors = errors.len(),
            "Sync cycle failed"
        );
        Err(first)
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Queues a message for the drain loop.
    pub fn enqueue(&self, message: SyncMessage) -> SyncResult<()> {
        self.inner.queue.enqueue(message)
    }

    /// Signs and sends everything queued right now. Returns how many
    /// envelopes were delivered.
    pub async fn drain_now(&self) -> usize {
        let mut delivered = 0;
        while let Some(message) = self.inner.queue.try_drain().await {
            if self.send_message(message).await {
                delivered += 1;
            }
        }
        delivered
    }

    async fn send_message(&self, message: SyncMessage) -> bool {
        let msg_type = message.type_name();
        let envelope = match self.inner.signer.sign(message) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(msg_type, error = %e, "Failed to sign message");
                self.inner.state.write().await.error_count += 1;
                return false;
            }
        };

        let delivered = self.inner.transport.send(&envelope).await;
        if !delivered {
            self.inner.state.write().await.error_count += 1;
        }
        delivered
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Durably logs a raw envelope from the peer for the next cycle.
    ///
    /// Nothing is verified or applied here.
    pub async fn receive(&self, raw: &str) -> SyncResult<i64> {
        if raw.trim().is_empty() {
            return Err(SyncError::MalformedMessage("empty envelope".into()));
        }
        let id = self
            .inner
            .store
            .append_sync_log(Direction::Incoming, raw, false)
            .await?;
        debug!(id, bytes = raw.len(), "Incoming envelope logged");
        Ok(id)
    }

    pub async fn receive_envelope(&self, envelope: &SignedEnvelope) -> SyncResult<i64> {
        self.receive(&envelope.to_wire()?).await
    }

    // =========================================================================
    // Status
    // =========================================================================

    pub fn set_active_sessions(&self, count: u32) {
        self.inner.active_sessions.store(count, Ordering::Relaxed);
    }

    pub async fn status(&self) -> EngineStatus {
        let state = self.state().await;

        let limit = self.inner.config.sync.recent_activity_limit;
        let recent_activity = match self.inner.store.recent_sync_log(limit).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Failed to read recent sync activity");
                Vec::new()
            }
        };

        EngineStatus {
            enabled: self.inner.config.sync.enabled,
            running: state.is_running,
            last_sync: state.last_attempt,
            last_successful_sync: (state.last_sync_timestamp > 0)
                .then_some(state.last_sync_timestamp),
            error_count: state.error_count,
            pending_outbound: self.inner.queue.len(),
            recent_activity,
        }
    }

    /// Seconds since epoch, for hosts building their own messages.
    pub fn now(&self) -> i64 {
        now_epoch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FlakyStore, ScriptedDelivery};
    use sibling_core::ConceptRecord;
    use sibling_db::{Database, DbConfig};
    use std::time::Duration;

    struct Node {
        db: Arc<Database>,
        delivery: Arc<ScriptedDelivery>,
        engine: SyncEngine,
    }

    async fn node(source: &str) -> Node {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let delivery = Arc::new(ScriptedDelivery::succeeding());
        let mut config = SyncConfig::with_secret("pair-secret");
        config.instance.source = source.to_string();
        config.sync.retry_delay_secs = 0;
        let engine = SyncEngine::new(
            config,
            db.clone(),
            delivery.clone(),
            Arc::new(StaticMetrics::default()),
        )
        .unwrap();
        Node {
            db,
            delivery,
            engine,
        }
    }

    /// Moves everything `from` sent into `to`'s incoming log.
    async fn ship(from: &Node, to: &Node) {
        from.engine.drain_now().await;
        for envelope in from.delivery.take_delivered() {
            to.engine.receive_envelope(&envelope).await.unwrap();
        }
    }

    async fn learn(node: &Node, text: &str, confidence: f64) {
        node.db
            .concepts()
            .insert(
                &ConceptRecord::new(text, "topic", now_epoch()).with_confidence(confidence),
                "local",
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let result = SyncEngine::from_config(SyncConfig::new(), db);
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_timestamp_advances_only_on_success() {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let store = Arc::new(FlakyStore::new(db));
        let engine = SyncEngine::new(
            SyncConfig::with_secret("s"),
            store.clone(),
            Arc::new(ScriptedDelivery::succeeding()),
            Arc::new(StaticMetrics::default()),
        )
        .unwrap();

        let report = engine.trigger_once().await.unwrap();
        let first = engine.state().await.last_sync_timestamp;
        assert_eq!(first, report.started_at);
        assert!(first > 0);

        store.set_fail_gather(true);
        assert!(engine.trigger_once().await.is_err());
        let state = engine.state().await;
        assert_eq!(state.last_sync_timestamp, first);
        assert_eq!(state.error_count, 1);

        store.set_fail_gather(false);
        engine.trigger_once().await.unwrap();
        assert!(engine.state().await.last_sync_timestamp >= first);
    }

    #[tokio::test]
    async fn test_receive_defers_application() {
        let a = node("alpha").await;
        let b = node("beta").await;
        learn(&a, "deferred", 0.7).await;

        a.engine.trigger_once().await.unwrap();
        ship(&a, &b).await;

        // Logged, not yet applied
        assert!(b.db.concepts().find_by_text("deferred").await.unwrap().is_none());
        assert_eq!(b.db.sync_log().pending_incoming().await.unwrap().len(), 3);

        let report = b.engine.trigger_once().await.unwrap();
        assert_eq!(report.ingest.applied, 3);
        let stored = b.db.concepts().find_by_text("deferred").await.unwrap().unwrap();
        assert_eq!(stored.source, "sync_alpha");
        assert!(b.db.peers().latest_status("alpha").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pair_converges_regardless_of_order() {
        let a = node("alpha").await;
        let b = node("beta").await;

        learn(&a, "X", 0.9).await;
        learn(&b, "X", 0.4).await;
        learn(&a, "only-a", 0.6).await;
        learn(&b, "only-b", 0.8).await;

        // b hears from a first, then a hears from b
        a.engine.trigger_once().await.unwrap();
        b.engine.trigger_once().await.unwrap();
        ship(&a, &b).await;
        ship(&b, &a).await;
        a.engine.trigger_once().await.unwrap();
        b.engine.trigger_once().await.unwrap();

        for node in [&a, &b] {
            let x = node.db.concepts().find_by_text("X").await.unwrap().unwrap();
            assert_eq!(x.record.confidence, 0.9);
            assert!(node.db.concepts().find_by_text("only-a").await.unwrap().is_some());
            assert!(node.db.concepts().find_by_text("only-b").await.unwrap().is_some());
        }
        assert_eq!(
            b.db.concepts().find_by_text("X").await.unwrap().unwrap().source,
            "sync_alpha"
        );
    }

    #[tokio::test]
    async fn test_status_read_model() {
        let a = node("alpha").await;
        a.engine.set_active_sessions(3);

        a.engine.trigger_once().await.unwrap();
        let status = a.engine.status().await;
        assert!(status.enabled);
        assert!(!status.running);
        assert_eq!(status.pending_outbound, 2);
        assert!(status.last_successful_sync.is_some());

        assert_eq!(a.engine.drain_now().await, 2);
        let status = a.engine.status().await;
        assert_eq!(status.pending_outbound, 0);
        assert_eq!(status.recent_activity.len(), 2);

        let sent = a.delivery.delivered();
        let active = sent.iter().find_map(|env| match &env.message {
            SyncMessage::StatusSync { status, .. } => Some(status.active_sessions),
            _ => None,
        });
        assert_eq!(active, Some(3));
    }

    #[tokio::test]
    async fn test_receive_rejects_empty_payload() {
        let a = node("alpha").await;
        assert!(a.engine.receive("   ").await.is_err());
        assert!(a.db.sync_log().pending_incoming().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_loops_run_and_stop() {
        let a = node("alpha").await;
        learn(&a, "looped", 0.5).await;

        a.engine.start().await.unwrap();
        a.engine.start().await.unwrap();
        assert!(a.engine.state().await.is_running);

        // First cycle runs immediately; the drain loop sends its output
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while (a.delivery.delivered().len() < 3 || a.engine.state().await.last_sync_timestamp == 0)
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(a.delivery.delivered().len(), 3);
        assert!(a.engine.state().await.last_sync_timestamp > 0);

        a.engine.stop().await;
        let state = a.engine.state().await;
        assert!(!state.is_running);
        assert_eq!(state.generation, 2);

        // The interval is an hour, so nothing else is sent
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(a.delivery.calls(), 3);
    }

    #[tokio::test]
    async fn test_failed_delivery_counts_error() {
        let a = node("alpha").await;
        a.delivery.set_down(true);

        a.engine.trigger_once().await.unwrap();
        assert_eq!(a.engine.drain_now().await, 0);

        let status = a.engine.status().await;
        assert_eq!(status.error_count, 2);
        // Two messages, three attempts each
        assert_eq!(a.delivery.calls(), 6);
        assert_eq!(status.recent_activity.len(), 6);
    }

    async fn wait_for_state(engine: &SyncEngine, done: impl Fn(&SyncState) -> bool) -> SyncState {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let state = engine.state().await;
            if done(&state) || tokio::time::Instant::now() >= deadline {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_trigger_loop_retries_after_failed_cycle() {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let store = Arc::new(FlakyStore::new(db));
        store.set_fail_gather(true);

        let mut config = SyncConfig::with_secret("s");
        config.sync.error_backoff_secs = 1;
        config.sync.retry_delay_secs = 0;
        let engine = SyncEngine::new(
            config,
            store.clone(),
            Arc::new(ScriptedDelivery::succeeding()),
            Arc::new(StaticMetrics::default()),
        )
        .unwrap();
        engine.start().await.unwrap();

        let state = wait_for_state(&engine, |s| s.error_count >= 1).await;
        assert_eq!(state.error_count, 1);
        assert_eq!(state.last_sync_timestamp, 0);

        // The loop survives and the next cycle, after the backoff, succeeds
        store.set_fail_gather(false);
        let state = wait_for_state(&engine, |s| s.last_sync_timestamp > 0).await;
        assert!(state.last_sync_timestamp > 0);
        assert!(state.is_running);
        assert_eq!(state.error_count, 1);

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_cancelled_cycle_keeps_timestamp() {
        let a = node("alpha").await;
        learn(&a, "unsent", 0.5).await;

        // A guard from a generation that was never started reads as stopped
        let stale = RunGuard::new(a.engine.inner.state.clone(), 7);
        let report = a.engine.run_cycle(Some(&stale)).await.unwrap();
        assert!(report.cancelled);
        assert!(!report.succeeded());
        assert_eq!(report.ingest.total(), 0);

        let state = a.engine.state().await;
        assert_eq!(state.last_sync_timestamp, 0);
        assert_eq!(state.last_attempt, Some(report.started_at));
        assert_eq!(state.error_count, 0);

        // A loop holding that guard exits without running a cycle
        tokio::time::timeout(Duration::from_secs(5), a.engine.clone().trigger_loop(stale))
            .await
            .unwrap();
        assert_eq!(a.engine.state().await.last_sync_timestamp, 0);
    }
}
