//! # Sync Transport
//!
//! Delivers signed envelopes to the peer with bounded retries.
//!
//! ## Send Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SyncTransport::send                             │
//! │                                                                         │
//! │   attempt 1 ──► PeerDelivery::deliver ──► sync_log (outgoing) row       │
//! │       │ fail                                                            │
//! │       ▼                                                                 │
//! │   sleep 1 × retry_delay                                                 │
//! │       │                                                                 │
//! │   attempt 2 ──► PeerDelivery::deliver ──► sync_log (outgoing) row       │
//! │       │ fail                                                            │
//! │       ▼                                                                 │
//! │   sleep 2 × retry_delay                                                 │
//! │       │                                                                 │
//! │   attempt 3 ──► PeerDelivery::deliver ──► sync_log (outgoing) row       │
//! │       │ fail                                                            │
//! │       ▼                                                                 │
//! │   give up, return false                                                 │
//! │                                                                         │
//! │  BACKOFF: linear (attempt × retry_delay), default 5s base, 3 attempts   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery Implementations
//! - [`LoopbackDelivery`]: accepts everything and logs it. Used when no peer
//!   URL is configured.
//! - [`WebSocketDelivery`]: sends each envelope as a text frame and waits
//!   for a [`PeerAck`] frame from the peer's listener.

use async_trait::async_trait;
use backoff::backoff::Backoff;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use sibling_core::Direction;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{PeerAck, SignedEnvelope};
use crate::store::SyncStore;

type PeerStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Linear Backoff
// =============================================================================

/// Waits `attempt × base` between attempts and stops after `max_attempts`.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl LinearBackoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        LinearBackoff {
            base,
            max_attempts,
            attempt: 0,
        }
    }
}

impl Backoff for LinearBackoff {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay before the next attempt, or `None` once every attempt is used.
    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            None
        } else {
            Some(self.base * self.attempt)
        }
    }
}

// =============================================================================
// Delivery Seam
// =============================================================================

/// Moves one envelope to the peer.
#[async_trait]
pub trait PeerDelivery: Send + Sync {
    /// Returns `Ok` once the peer has taken the envelope.
    async fn deliver(&self, envelope: &SignedEnvelope) -> SyncResult<()>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Stand-in delivery that accepts every envelope.
#[derive(Debug, Default, Clone)]
pub struct LoopbackDelivery;

#[async_trait]
impl PeerDelivery for LoopbackDelivery {
    async fn deliver(&self, envelope: &SignedEnvelope) -> SyncResult<()> {
        info!(
            msg_type = envelope.message.type_name(),
            source = envelope.message.source(),
            signed_at = envelope.timestamp,
            "Loopback delivery (no peer configured)"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

/// Delivers envelopes over a WebSocket to the peer's listener.
///
/// The connection is opened on first use and kept for later envelopes.
/// Any error drops it, so the next attempt reconnects.
pub struct WebSocketDelivery {
    url: String,
    connect_timeout: Duration,
    ack_timeout: Duration,
    stream: Mutex<Option<PeerStream>>,
}

impl WebSocketDelivery {
    pub fn new(url: impl Into<String>, ack_timeout: Duration) -> Self {
        WebSocketDelivery {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            ack_timeout,
            stream: Mutex::new(None),
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    async fn connect(&self) -> SyncResult<PeerStream> {
        match timeout(self.connect_timeout, connect_async(self.url.as_str())).await {
            Ok(Ok((stream, response))) => {
                info!(url = %self.url, status = ?response.status(), "Connected to peer");
                Ok(stream)
            }
            Ok(Err(e)) => Err(SyncError::from(e)),
            Err(_) => Err(SyncError::Timeout(self.connect_timeout.as_secs())),
        }
    }

    async fn exchange(&self, stream: &mut PeerStream, wire: String) -> SyncResult<()> {
        stream.send(WsMessage::Text(wire.into())).await?;

        let ack = timeout(self.ack_timeout, read_ack(stream))
            .await
            .map_err(|_| SyncError::Timeout(self.ack_timeout.as_secs()))??;

        if ack.accepted {
            debug!(remote_id = ?ack.log_id, "Peer acknowledged envelope");
            Ok(())
        } else {
            Err(SyncError::Rejected(
                ack.reason.unwrap_or_else(|| "no reason given".to_string()),
            ))
        }
    }
}

async fn read_ack(stream: &mut PeerStream) -> SyncResult<PeerAck> {
    while let Some(frame) = stream.next().await {
        match frame? {
            WsMessage::Text(text) => {
                return PeerAck::from_json(&text)
                    .map_err(|e| SyncError::MalformedMessage(format!("bad ack: {}", e)));
            }
            WsMessage::Ping(data) => stream.send(WsMessage::Pong(data)).await?,
            WsMessage::Close(frame) => {
                debug!(?frame, "Peer closed connection");
                return Err(SyncError::Disconnected);
            }
            _ => {}
        }
    }
    Err(SyncError::Disconnected)
}

#[async_trait]
impl PeerDelivery for WebSocketDelivery {
    async fn deliver(&self, envelope: &SignedEnvelope) -> SyncResult<()> {
        let wire = envelope.to_wire()?;
        let mut guard = self.stream.lock().await;

        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        self.exchange(&mut stream, wire).await?;
        *guard = Some(stream);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// Picks the delivery for the configured peer.
pub fn delivery_for(config: &SyncConfig) -> Arc<dyn PeerDelivery> {
    match config.peer_url() {
        Some(url) => Arc::new(WebSocketDelivery::new(url, config.ack_timeout())),
        None => Arc::new(LoopbackDelivery),
    }
}

// =============================================================================
// Sync Transport
// =============================================================================

/// Sends envelopes through a [`PeerDelivery`], retrying and auditing.
#[derive(Clone)]
pub struct SyncTransport {
    delivery: Arc<dyn PeerDelivery>,
    store: Arc<dyn SyncStore>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl SyncTransport {
    pub fn new(
        delivery: Arc<dyn PeerDelivery>,
        store: Arc<dyn SyncStore>,
        config: &SyncConfig,
    ) -> Self {
        SyncTransport {
            delivery,
            store,
            max_attempts: config.sync.max_retry_attempts.max(1),
            retry_delay: config.retry_delay(),
        }
    }

    /// Sends one envelope. Returns false only after every attempt failed.
    ///
    /// Each attempt writes one outgoing log row, marked processed if that
    /// attempt was delivered.
    pub async fn send(&self, envelope: &SignedEnvelope) -> bool {
        let msg_type = envelope.message.type_name();

        let wire = match envelope.to_wire() {
            Ok(wire) => wire,
            Err(e) => {
                error!(msg_type, error = %e, "Cannot encode envelope");
                return false;
            }
        };

        let mut backoff = LinearBackoff::new(self.retry_delay, self.max_attempts);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result = self.delivery.deliver(envelope).await;
            self.audit(&wire, result.is_ok()).await;

            let err = match result {
                Ok(()) => {
                    debug!(msg_type, attempt, delivery = self.delivery.name(), "Envelope sent");
                    return true;
                }
                Err(e) => e,
            };

            match backoff.next_backoff() {
                Some(delay) => {
                    warn!(msg_type, attempt, ?delay, error = %err, "Send failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!(msg_type, attempts = attempt, error = %err, "Send failed, giving up");
                    return false;
                }
            }
        }
    }

    async fn audit(&self, wire: &str, delivered: bool) {
        if let Err(e) = self
            .store
            .append_sync_log(Direction::Outgoing, wire, delivered)
            .await
        {
            warn!(error = %e, "Failed to write outgoing sync log row");
        }
    }
}
