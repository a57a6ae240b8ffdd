//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │ Transient I/O   │  │     Protocol            │ │
//! │  │                 │  │  (retryable)    │  │   (discard, no retry)   │ │
//! │  │  InvalidConfig  │  │  Database       │  │  AuthFailure            │ │
//! │  │  InvalidUrl     │  │  Connection     │  │  MalformedMessage       │ │
//! │  │  ConfigLoad/Save│  │  Timeout        │  │  SerializationFailed    │ │
//! │  └─────────────────┘  │  Disconnected   │  └─────────────────────────┘ │
//! │                       │  WebSocketError │                              │
//! │  ┌─────────────────┐  └─────────────────┘  ┌─────────────────────────┐ │
//! │  │  Collaborator   │                       │      Internal           │ │
//! │  │  BudgetExhausted│                       │  TaskFailed, Channel    │ │
//! │  └─────────────────┘                       └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing here is fatal to the process: the engine loops log the error,
//! bump the status error counter and retry on their own schedule.

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid peer URL.
    #[error("Invalid peer URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transient I/O Errors
    // =========================================================================
    /// Storage operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Failed to establish a connection to the peer.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Peer connection closed unexpectedly.
    #[error("Disconnected from peer")]
    Disconnected,

    /// No answer within the allowed time.
    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Signature missing or does not match the message.
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    /// Unknown message type, missing field, or payload of the wrong shape.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Failed to serialize a message.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Peer answered with a negative acknowledgement.
    #[error("Peer rejected envelope: {0}")]
    Rejected(String),

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    /// The token budget cannot cover the requested work.
    #[error("Token budget exhausted: balance {balance}, requested {requested}")]
    BudgetExhausted { balance: i64, requested: i64 },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// A background job returned an error or panicked.
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<sibling_db::DbError> for SyncError {
    fn from(err: sibling_db::DbError) -> Self {
        match err {
            sibling_db::DbError::BudgetExhausted { balance, requested } => {
                SyncError::BudgetExhausted { balance, requested }
            }
            other => SyncError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed => SyncError::Disconnected,
            WsError::AlreadyClosed => SyncError::Disconnected,
            WsError::Protocol(p) => SyncError::WebSocketError(p.to_string()),
            WsError::Io(io) => SyncError::ConnectionFailed(io.to_string()),
            other => SyncError::WebSocketError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the operation can be retried later.
    ///
    /// ## Retryable Errors
    /// - Storage hiccups
    /// - Connection failures, timeouts, disconnections
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Bad signatures and malformed messages
    /// - Budget exhaustion
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Database(_)
                | SyncError::ConnectionFailed(_)
                | SyncError::Disconnected
                | SyncError::Timeout(_)
                | SyncError::WebSocketError(_)
                | SyncError::Rejected(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the message itself is bad and must be discarded.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            SyncError::AuthFailure(_)
                | SyncError::MalformedMessage(_)
                | SyncError::SerializationFailed(_)
        )
    }
}
