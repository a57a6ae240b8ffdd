//! # Sync Configuration
//!
//! Configuration management for the sync engine, the peer listener and the
//! debounced task queue.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                            │
//! │     SIBLING_PEER_URL=ws://10.0.0.2:8790/sync                            │
//! │     SIBLING_SHARED_SECRET=...                                           │
//! │                                                                         │
//! │  2. TOML Config File                                                    │
//! │     ~/.config/sibling/sync.toml (Linux)                                 │
//! │     ~/Library/Application Support/com.sibling.agent/sync.toml (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                    │
//! │     hourly cycles, loopback delivery, generated instance id             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [instance]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! source = "sibling-v1"
//!
//! [peer]
//! url = "ws://10.0.0.2:8790/sync"
//! shared_secret = "change-me"
//! ack_timeout_secs = 10
//!
//! [sync]
//! enabled = true
//! interval_secs = 3600
//! error_backoff_secs = 60
//!
//! [listener]
//! enabled = true
//! port = 8790
//!
//! [tasks]
//! delay_secs = 10
//! max_queue_size = 5
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Instance Configuration
// =============================================================================

/// Identity of this instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Unique instance identifier (UUID v4).
    /// Auto-generated on first run if not provided.
    #[serde(default = "default_instance_id")]
    pub id: String,

    /// Identifier sent as `source` in every message.
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_instance_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_source() -> String {
    "sibling-v1".to_string()
}

impl Default for InstanceConfig {
    fn default() -> Self {
        InstanceConfig {
            id: default_instance_id(),
            source: default_source(),
        }
    }
}

// =============================================================================
// Peer Configuration
// =============================================================================

/// Where the peer lives and how we authenticate to it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerConfig {
    /// WebSocket URL of the peer listener. `None` means loopback delivery.
    #[serde(default)]
    pub url: Option<String>,

    /// HMAC key shared by both instances.
    #[serde(default)]
    pub shared_secret: String,

    /// How long to wait for the peer's acknowledgement (seconds).
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_secs: u64,
}

fn default_ack_timeout() -> u64 {
    10
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Cycle scheduling and delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Run the periodic trigger loop.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Pause after a successful cycle (seconds).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Pause after a failed cycle (seconds).
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,

    /// Longest a single outbound pop waits before re-checking for shutdown.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,

    /// Delivery attempts per envelope.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Base of the linear retry delay (seconds): attempt `n` waits `n * base`.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Maximum concepts per ConceptSync message.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Log rows shown in `status().recent_activity`.
    #[serde(default = "default_recent_activity_limit")]
    pub recent_activity_limit: u32,
}

fn default_true() -> bool {
    true
}
fn default_interval() -> u64 {
    3600
}
fn default_error_backoff() -> u64 {
    60
}
fn default_drain_timeout() -> u64 {
    10
}
fn default_max_retry_attempts() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    5
}
fn default_batch_size() -> usize {
    100
}
fn default_recent_activity_limit() -> u32 {
    20
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            enabled: true,
            interval_secs: default_interval(),
            error_backoff_secs: default_error_backoff(),
            drain_timeout_secs: default_drain_timeout(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_delay_secs: default_retry_delay(),
            batch_size: default_batch_size(),
            recent_activity_limit: default_recent_activity_limit(),
        }
    }
}

// =============================================================================
// Listener Settings
// =============================================================================

/// The WebSocket endpoint the peer delivers to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Bind address (default: 0.0.0.0 for all interfaces).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_listener_port")]
    pub port: u16,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_listener_port() -> u16 {
    8790
}

impl Default for ListenerSettings {
    fn default() -> Self {
        ListenerSettings {
            enabled: false,
            bind_addr: default_bind_addr(),
            port: default_listener_port(),
        }
    }
}

impl ListenerSettings {
    /// Returns the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// =============================================================================
// Task Queue Settings
// =============================================================================

/// Debounce settings for background jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSettings {
    /// Quiet period before a batch runs (seconds).
    #[serde(default = "default_task_delay")]
    pub delay_secs: u64,

    /// Pending jobs above this count run immediately.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

fn default_task_delay() -> u64 {
    10
}

fn default_max_queue_size() -> usize {
    5
}

impl Default for TaskSettings {
    fn default() -> Self {
        TaskSettings {
            delay_secs: default_task_delay(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub instance: InstanceConfig,

    #[serde(default)]
    pub peer: PeerConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub listener: ListenerSettings,

    #[serde(default)]
    pub tasks: TaskSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated instance ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults plus the given shared secret.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.peer.shared_secret = secret.into();
        config
    }

    /// Defaults plus a freshly generated shared secret, for a first run.
    ///
    /// Both peers need the same secret: copy it into the other side's
    /// config before pairing.
    pub fn starter() -> Self {
        Self::with_secret(Uuid::new_v4().simple().to_string())
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.instance.id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("instance.id must not be empty".into()));
        }

        if self.instance.source.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "instance.source must not be empty".into(),
            ));
        }

        if self.peer.shared_secret.is_empty() {
            return Err(SyncError::InvalidConfig(
                "peer.shared_secret must be set".into(),
            ));
        }

        if let Some(ref raw) = self.peer.url {
            let url = url::Url::parse(raw)?;
            if url.scheme() != "ws" && url.scheme() != "wss" {
                return Err(SyncError::InvalidUrl(format!(
                    "Peer URL must start with ws:// or wss://, got: {}",
                    raw
                )));
            }
        }

        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        if self.sync.max_retry_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "max_retry_attempts must be greater than 0".into(),
            ));
        }

        if self.tasks.max_queue_size == 0 {
            return Err(SyncError::InvalidConfig(
                "max_queue_size must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("SIBLING_INSTANCE_ID") {
            debug!(instance_id = %id, "Overriding instance ID from environment");
            self.instance.id = id;
        }

        if let Ok(source) = std::env::var("SIBLING_SOURCE") {
            self.instance.source = source;
        }

        if let Ok(url) = std::env::var("SIBLING_PEER_URL") {
            debug!(url = %url, "Overriding peer URL from environment");
            self.peer.url = if url.is_empty() { None } else { Some(url) };
        }

        if let Ok(secret) = std::env::var("SIBLING_SHARED_SECRET") {
            self.peer.shared_secret = secret;
        }

        if let Ok(interval) = std::env::var("SIBLING_SYNC_INTERVAL") {
            match interval.parse::<u64>() {
                Ok(secs) => self.sync.interval_secs = secs,
                Err(_) => warn!(value = %interval, "Ignoring invalid SIBLING_SYNC_INTERVAL"),
            }
        }

        if let Ok(enabled) = std::env::var("SIBLING_SYNC_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.sync.enabled = true,
                "0" | "false" | "no" | "off" => self.sync.enabled = false,
                _ => warn!(value = %enabled, "Ignoring invalid SIBLING_SYNC_ENABLED"),
            }
        }

        if let Ok(port) = std::env::var("SIBLING_LISTENER_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                debug!(port = p, "Overriding listener port from environment");
                self.listener.port = p;
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "sibling", "agent")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    /// Returns the default database file path.
    pub fn default_database_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "sibling", "agent")
            .map(|dirs| dirs.data_dir().join("sibling.db"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn source(&self) -> &str {
        &self.instance.source
    }

    pub fn peer_url(&self) -> Option<&str> {
        self.peer.url.as_deref()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.sync.error_backoff_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.drain_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.sync.retry_delay_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.peer.ack_timeout_secs)
    }

    pub fn task_delay(&self) -> Duration {
        Duration::from_secs(self.tasks.delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(!config.instance.id.is_empty()); // Auto-generated
        assert_eq!(config.sync.interval_secs, 3600);
        assert_eq!(config.sync.max_retry_attempts, 3);
        assert_eq!(config.sync.retry_delay_secs, 5);
        assert_eq!(config.sync.batch_size, 100);
        assert_eq!(config.tasks.delay_secs, 10);
        assert_eq!(config.tasks.max_queue_size, 5);
        assert!(config.peer_url().is_none());
        assert!(!config.listener.enabled);
    }

    #[test]
    fn test_config_validation() {
        // No secret by default
        let mut config = SyncConfig::default();
        assert!(config.validate().is_err());

        config.peer.shared_secret = "s3cret".to_string();
        assert!(config.validate().is_ok());

        config.peer.url = Some("http://peer:8790".to_string());
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.peer.url = Some("ws://localhost:8790/sync".to_string());
        assert!(config.validate().is_ok());

        config.sync.max_retry_attempts = 0;
        assert!(config.validate().is_err());
        config.sync.max_retry_attempts = 3;

        config.tasks.max_queue_size = 0;
        assert!(config.validate().is_err());
        config.tasks.max_queue_size = 5;

        config.instance.id = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml_str = r#"
            [peer]
            shared_secret = "abc"
            url = "wss://peer.example:443/sync"

            [sync]
            interval_secs = 120
        "#;
        let config: SyncConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sync.interval_secs, 120);
        assert_eq!(config.sync.error_backoff_secs, 60);
        assert_eq!(config.instance.source, "sibling-v1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_serialization() {
        let config = SyncConfig::with_secret("abc");
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[instance]"));
        assert!(toml_str.contains("[sync]"));
        assert!(toml_str.contains("[tasks]"));

        let parsed: SyncConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.instance.id, config.instance.id);
    }

    #[test]
    fn test_starter_saves_and_reloads() {
        let dir = std::env::temp_dir().join(format!("sibling-config-{}", Uuid::new_v4()));
        let path = dir.join("sync.toml");

        let config = SyncConfig::starter();
        assert!(config.validate().is_ok());
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: SyncConfig = toml::from_str(&contents).unwrap();
        assert_eq!(parsed.peer.shared_secret, config.peer.shared_secret);
        assert_eq!(parsed.instance.id, config.instance.id);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_bind_address() {
        let listener = ListenerSettings::default();
        assert_eq!(listener.bind_address(), "0.0.0.0:8790");
    }
}
