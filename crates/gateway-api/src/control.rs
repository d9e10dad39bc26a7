//! Write-control endpoints.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/control/take` | Claim control with a token |
//! | `POST` | `/api/control/release` | Release control |
//! | `GET` | `/api/control/status` | Control state for the caller's token |

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;

use crate::error::ApiError;
use crate::params::{ObjectQuery, control_token};
use crate::state::AppState;

/// Request body for `POST /api/control/take`.
#[derive(Debug, Default, serde::Deserialize)]
pub struct TakeRequest {
    /// The token to claim control with.
    #[serde(default)]
    pub token: Option<String>,
}

/// Claim control.
///
/// The token comes from the JSON body, falling back to the
/// `X-Control-Token` header and then the `token` query parameter.
pub async fn take(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ObjectQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: TakeRequest = if body.is_empty() {
        TakeRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid body: {e}")))?
    };
    let token = request
        .token
        .as_deref()
        .or_else(|| control_token(&headers, &query))
        .unwrap_or_default();

    let view = state.gateway.control().take(token).await?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "isController": view.is_controller,
        "hasController": view.has_controller,
        "timeoutSec": view.timeout_sec,
    })))
}

/// Release control.
pub async fn release(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.gateway.control().release().await;
    Json(serde_json::json!({ "ok": true }))
}

/// Control state as seen by the caller's token, if any.
pub async fn status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ObjectQuery>,
) -> impl IntoResponse {
    Json(state.gateway.control().status(control_token(&headers, &query)))
}
