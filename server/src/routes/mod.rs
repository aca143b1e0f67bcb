//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the session-registry REST endpoints and the realtime websocket
//! under a single Axum router. The browser clients are served elsewhere;
//! CORS is wide open for them.

pub mod sessions;
pub mod ws;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/session/generate", post(sessions::generate))
        .route("/session/validate", post(sessions::validate))
        .route("/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}
