// Relay server wiring: configuration, the WebSocket hub, and the
// axum router, kept in library form so integration tests can host it.

pub mod config;
pub mod ws;

use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use duet_core::Coordinator;

use crate::config::ServerConfig;
use crate::ws::Hub;

/// Spawn the hub task for `config` and build the router serving it.
pub fn build_app(config: &ServerConfig) -> Router {
    let coordinator = Coordinator::new(config.core_config());
    let (hub, hub_rx) = Hub::new();
    tokio::spawn(ws::run_hub(coordinator, hub_rx));
    build_router(hub)
}

pub fn build_router(hub: Hub) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
