//! # Sibling Daemon
//!
//! Host process for the peer sync engine.
//!
//! ```text
//! sibling-daemon [CONFIG_PATH]
//! sibling-daemon init [CONFIG_PATH]
//! ```
//!
//! With no path the config lives in the platform config directory
//! (see [`SyncConfig::default_config_path`]). `init` writes a starter config
//! with a fresh shared secret and exits. `SIBLING_DB_PATH` overrides the
//! database location; `RUST_LOG` controls log output.

use std::path::PathBuf;
use std::sync::Arc;

use sibling_db::{Database, DbConfig};
use sibling_sync::{PeerListener, SyncConfig, SyncEngine};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let mut args = std::env::args().skip(1).peekable();
    if args.peek().map(String::as_str) == Some("init") {
        args.next();
        let config_path = args.next().map(PathBuf::from);
        SyncConfig::starter().save(config_path)?;
        return Ok(());
    }

    info!("Starting Sibling daemon...");

    // Load configuration
    let config_path = args.next().map(PathBuf::from);
    let config = SyncConfig::load(config_path)?;
    info!(
        source = %config.source(),
        enabled = config.sync.enabled,
        peer = config.peer_url().unwrap_or("loopback"),
        "Configuration loaded"
    );

    // Open database
    let db_path = match std::env::var("SIBLING_DB_PATH") {
        Ok(path) => PathBuf::from(path),
        Err(_) => SyncConfig::default_database_path()
            .ok_or("Could not determine a data directory for the database")?,
    };
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Arc::new(Database::new(DbConfig::new(db_path.clone())).await?);
    info!(path = %db_path.display(), "Database ready");

    // Engine and listener
    let listener_settings = config.listener.clone();
    let engine = SyncEngine::from_config(config, db.clone())?;

    let listener = if listener_settings.enabled {
        Some(
            PeerListener::new(listener_settings, engine.clone())
                .start()
                .await?,
        )
    } else {
        None
    };

    engine.start().await?;

    shutdown_signal().await;

    engine.stop().await;
    let flushed = engine.drain_now().await;
    if flushed > 0 {
        info!(messages = flushed, "Flushed outbound queue");
    }

    if let Some(listener) = listener {
        if let Err(e) = listener.shutdown().await {
            warn!(error = %e, "Listener did not shut down cleanly");
        }
    }

    db.close().await;
    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping sync engine...");
}
