//! # Peer Listener
//!
//! Accepts envelopes pushed by the peer's [`WebSocketDelivery`] and hands
//! them to [`SyncEngine::receive`].
//!
//! ## Routes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  GET /sync     WebSocket. Each text frame is one envelope; the reply    │
//! │                is a PeerAck frame. Accepted means durably logged, not   │
//! │                verified: signatures are checked at ingest time.         │
//! │  GET /status   EngineStatus as JSON                                     │
//! │  GET /health   "OK"                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`WebSocketDelivery`]: crate::transport::WebSocketDelivery

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ListenerSettings;
use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::protocol::PeerAck;

/// Largest envelope accepted from the peer.
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Handle for a running listener.
#[derive(Clone)]
pub struct ListenerHandle {
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
}

impl ListenerHandle {
    /// The address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Listener shutdown channel closed".into()))
    }
}

pub struct PeerListener {
    settings: ListenerSettings,
    engine: SyncEngine,
}

impl PeerListener {
    pub fn new(settings: ListenerSettings, engine: SyncEngine) -> Self {
        PeerListener { settings, engine }
    }

    /// Binds and serves in a background task.
    pub async fn start(self) -> SyncResult<ListenerHandle> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let app = Router::new()
            .route("/sync", get(ws_handler))
            .route("/status", get(status_handler))
            .route("/health", get(health_handler))
            .with_state(self.engine);

        let bind_addr = self.settings.bind_address();
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            SyncError::ConnectionFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SyncError::ConnectionFailed(e.to_string()))?;

        info!(addr = %local_addr, "Peer listener started");

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await;
                    info!("Peer listener shutting down");
                })
                .await
                .ok();
        });

        Ok(ListenerHandle {
            local_addr,
            shutdown_tx,
        })
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler() -> impl IntoResponse {
    "OK"
}

async fn status_handler(State(engine): State<SyncEngine>) -> impl IntoResponse {
    Json(engine.status().await)
}

async fn ws_handler(ws: WebSocketUpgrade, State(engine): State<SyncEngine>) -> impl IntoResponse {
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, engine))
}

async fn handle_socket(mut socket: WebSocket, engine: SyncEngine) {
    debug!("Peer connected");

    while let Some(frame) = socket.recv().await {
        let ack = match frame {
            Ok(Message::Text(text)) => match engine.receive(text.as_str()).await {
                Ok(id) => PeerAck::accepted(id),
                Err(e) => {
                    warn!(error = %e, "Failed to log incoming envelope");
                    PeerAck::rejected(e.to_string())
                }
            },
            Ok(Message::Binary(_)) => PeerAck::rejected("binary frames are not supported"),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "Peer connection error");
                break;
            }
        };

        let reply = match ack.to_json() {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Failed to encode ack");
                break;
            }
        };
        if socket.send(Message::Text(reply.into())).await.is_err() {
            break;
        }
    }

    debug!("Peer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::metrics::StaticMetrics;
    use crate::protocol::SyncMessage;
    use crate::signer::Signer;
    use crate::testing::ScriptedDelivery;
    use crate::transport::{PeerDelivery, WebSocketDelivery};
    use sibling_core::MetricsSnapshot;
    use sibling_db::{Database, DbConfig};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_websocket_delivery_round_trip() {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let engine = SyncEngine::new(
            SyncConfig::with_secret("pair"),
            db.clone(),
            Arc::new(ScriptedDelivery::succeeding()),
            Arc::new(StaticMetrics::default()),
        )
        .unwrap();

        let settings = ListenerSettings {
            enabled: true,
            bind_addr: "127.0.0.1".into(),
            port: 0,
        };
        let handle = PeerListener::new(settings, engine.clone())
            .start()
            .await
            .unwrap();

        let url = format!("ws://{}/sync", handle.local_addr());
        let delivery = WebSocketDelivery::new(url, Duration::from_secs(5));
        let signer = Signer::new("pair");

        for n in 0..2 {
            let envelope = signer
                .sign(SyncMessage::MetricsSync {
                    timestamp: n,
                    source: "beta".into(),
                    metrics: MetricsSnapshot::baseline(),
                })
                .unwrap();
            delivery.deliver(&envelope).await.unwrap();
        }

        assert_eq!(db.sync_log().pending_incoming().await.unwrap().len(), 2);

        let report = engine.trigger_once().await.unwrap();
        assert_eq!(report.ingest.applied, 2);
        assert_eq!(db.peers().metrics_history("beta", 10).await.unwrap().len(), 2);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_peer_fails() {
        let delivery = WebSocketDelivery::new("ws://127.0.0.1:1/sync", Duration::from_secs(1))
            .with_connect_timeout(Duration::from_secs(2));
        let envelope = Signer::new("pair")
            .sign(SyncMessage::metrics_sync("beta", MetricsSnapshot::new()))
            .unwrap();

        let err = delivery.deliver(&envelope).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
