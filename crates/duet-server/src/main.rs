//! # duet-server
//!
//! Relay coordinator for a private two-party session:
//! - **WebSocket event channel** carrying login/presence, the message
//!   ledger, and call signaling between the two fixed identities
//! - **Single hub task** owning all mutable state, so every inbound
//!   event runs to completion before the next (race-free guards)
//! - **Health endpoint** for deployment checks

use tracing::info;
use tracing_subscriber::EnvFilter;

use duet_server::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,duet_server=debug,duet_core=debug")),
        )
        .init();

    info!("Starting duet relay server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Spawn the hub task and serve (blocks until shutdown)
    // -----------------------------------------------------------------------
    let app = duet_server::build_app(&config);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "Listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Server failed");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
