//! Axum router construction for the gateway API.
//!
//! Assembles all routes (REST + SSE) into a single [`Router`] with CORS
//! middleware enabled for cross-origin dashboard access.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{control, export, handlers, objects, recording, sse};

/// Build the complete Axum router for the gateway.
///
/// The router includes:
/// - `GET /` -- minimal HTML status page
/// - `GET /api/events` -- SSE push stream
/// - `GET /api/servers` -- configured servers
/// - `POST /api/objects/{name}/{proto}/subscribe|unsubscribe|set`
/// - `POST /api/control/take|release`, `GET /api/control/status`
/// - `POST /api/recording/start|stop|clear`, `GET /api/recording/status`
/// - `GET /api/export/json|csv|database`
///
/// CORS allows any origin.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Status page
        .route("/", get(handlers::index))
        // Push stream
        .route("/api/events", get(sse::events))
        .route("/api/servers", get(handlers::list_servers))
        // Objects
        .route("/api/objects/{name}/{proto}/subscribe", post(objects::subscribe))
        .route("/api/objects/{name}/{proto}/unsubscribe", post(objects::unsubscribe))
        .route("/api/objects/{name}/{proto}/set", post(objects::set_value))
        // Control
        .route("/api/control/take", post(control::take))
        .route("/api/control/release", post(control::release))
        .route("/api/control/status", get(control::status))
        // Recording
        .route("/api/recording/start", post(recording::start))
        .route("/api/recording/stop", post(recording::stop))
        .route("/api/recording/clear", post(recording::clear))
        .route("/api/recording/status", get(recording::status))
        // Export
        .route("/api/export/json", get(export::json))
        .route("/api/export/csv", get(export::csv))
        .route("/api/export/database", get(export::database))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
