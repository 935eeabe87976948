use axum::{routing::get, Router};

use crate::state::AppState;
use crate::ws;

/// Build the axum Router: the WebSocket endpoint and a health check.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::handler::ws_upgrade))
        .route("/health", get(health_check))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
