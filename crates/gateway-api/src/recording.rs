//! Recording control endpoints.
//!
//! Each transition broadcasts `recording_status` to every session and
//! returns the new status.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;

use crate::state::AppState;

/// Start recording subscribed topics. No-op when already recording.
pub async fn start(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.gateway.start_recording().await)
}

/// Stop recording, keeping the buffer.
pub async fn stop(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.gateway.stop_recording().await)
}

/// Empty the recording buffer.
pub async fn clear(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.gateway.clear_recording().await)
}

/// Current recording status.
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.gateway.recorder().status())
}
