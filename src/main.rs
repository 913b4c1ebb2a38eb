//! tagwire - demo peer
//!
//! Accepts TCP connections and answers file listing and ping requests over
//! varint-delimited JSON envelopes.

mod handlers;
mod peer;
mod schema;

use peer::Peer;
use std::sync::Arc;
use tagwire_connection::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if TAGWIRE_CONFIG is set, then env overrides)
    let config_path = std::env::var("TAGWIRE_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(ref path) = config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::warn!("Invalid environment overrides ({}), using defaults", e);
            Config::default()
        }
    };

    tracing::info!("Starting tagwire peer");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Max connections: {}", config.network.max_connections);
    tracing::info!("  Max frame size: {} bytes", config.connection.max_frame_size);
    if config.heartbeat.enabled {
        tracing::info!("  Heartbeat: every {}s", config.heartbeat.interval_secs);
    } else {
        tracing::info!("  Heartbeat: disabled");
    }

    let handlers = handlers::build();
    tracing::debug!("Registered handlers: {:?}", handlers.registered());

    let peer = Arc::new(Peer::new(config, handlers));

    // Spawn shutdown signal handler
    let shutdown_peer = peer.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping peer...");
        shutdown_peer.shutdown();
    });

    // Run peer (blocks until shutdown)
    peer.run().await?;

    tracing::info!(
        "Peer stopped ({} connections served, {} rejected)",
        peer.stats()
            .connections_total
            .load(std::sync::atomic::Ordering::Relaxed),
        peer.stats()
            .connections_rejected
            .load(std::sync::atomic::Ordering::Relaxed)
    );
    Ok(())
}
