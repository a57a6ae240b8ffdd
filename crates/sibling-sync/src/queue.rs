//! # Outbound Queue
//!
//! FIFO of messages waiting to be signed and sent. Producers are the sync
//! cycle (and anything else holding an [`OutboundQueue`] clone); the single
//! consumer is the engine's drain loop.
//!
//! `enqueue` never blocks. `drain` waits at most the given timeout so the
//! drain loop can notice a stop request between messages.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::protocol::SyncMessage;

/// Unbounded queue of outgoing sync messages.
#[derive(Clone)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<SyncMessage>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<SyncMessage>>>,
    len: Arc<AtomicUsize>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        OutboundQueue {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            len: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Appends a message.
    pub fn enqueue(&self, message: SyncMessage) -> SyncResult<()> {
        let kind = message.type_name();

        // Count first so a concurrent drain never sees the length underflow
        self.len.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(message).is_err() {
            self.len.fetch_sub(1, Ordering::SeqCst);
            return Err(SyncError::ChannelError("Outbound queue closed".into()));
        }

        debug!(kind, pending = self.len(), "Message queued");
        Ok(())
    }

    /// Takes the oldest message, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` if the queue stayed empty.
    pub async fn drain(&self, timeout: Duration) -> Option<SyncMessage> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(message)) => {
                self.len.fetch_sub(1, Ordering::SeqCst);
                Some(message)
            }
            _ => None,
        }
    }

    /// Takes the oldest message without waiting.
    pub async fn try_drain(&self) -> Option<SyncMessage> {
        let mut rx = self.rx.lock().await;
        let message = rx.try_recv().ok()?;
        self.len.fetch_sub(1, Ordering::SeqCst);
        Some(message)
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}
