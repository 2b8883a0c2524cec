use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::websocket::ws_handler;

use super::AppState;

pub fn create_app(state: AppState) -> Router {
    Router::new()
        // WebSocket endpoint for field devices
        .route("/ws", get(ws_handler))
        // Liveness probe
        .route("/healthz", get(healthz))
        // Add middleware
        .layer(TraceLayer::new_for_http())
        // Add state
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}
