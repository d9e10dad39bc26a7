//! Per-object endpoints: subscribe, unsubscribe and write.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/objects/{name}/{proto}/subscribe` | Watch sensors on an object |
//! | `POST` | `/api/objects/{name}/{proto}/unsubscribe` | Stop watching an object |
//! | `POST` | `/api/objects/{name}/{proto}/set` | Write a sensor value (controller only) |
//!
//! Subscribe and unsubscribe need the caller's SSE session id; `set`
//! needs the control token.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use gateway_types::{SensorKey, SensorValue};
use tracing::debug;

use crate::error::ApiError;
use crate::params::{self, ObjectQuery};
use crate::state::AppState;

/// Request body for `POST .../subscribe`.
///
/// `sensor_ids` and `sensors` are merged; each entry is a numeric id or a
/// sensor name.
#[derive(Debug, Default, serde::Deserialize)]
pub struct SubscribeRequest {
    /// Sensors by id (or name).
    #[serde(default)]
    pub sensor_ids: Vec<SensorKey>,
    /// Sensors by name (or id).
    #[serde(default)]
    pub sensors: Vec<SensorKey>,
}

impl SubscribeRequest {
    /// All requested keys, de-duplicated.
    pub fn keys(self) -> BTreeSet<SensorKey> {
        self.sensor_ids.into_iter().chain(self.sensors).collect()
    }
}

/// Request body for `POST .../set`.
#[derive(Debug, serde::Deserialize)]
pub struct SetRequest {
    /// Target sensor, by id or name.
    pub sensor_id: SensorKey,
    /// New value.
    pub value: SensorValue,
}

/// Subscribe the caller's session to sensors on an object.
///
/// An empty sensor list removes the subscription.
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    Path((object, proto)): Path<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<ObjectQuery>,
    Json(body): Json<SubscribeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let protocol = params::protocol(&proto)?;
    let session_id = params::session_id(&headers, &query)?;
    let topic = params::topic(&state, &query, &object)?;

    let subscribed = state
        .gateway
        .subscribe(session_id, topic.clone(), protocol, body.keys())
        .await?;
    debug!(session_id = %session_id, topic = %topic, subscribed, "Subscription updated");

    Ok(Json(serde_json::json!({
        "ok": true,
        "server": topic.server_id,
        "object": topic.object_name,
        "subscribed": subscribed,
    })))
}

/// Drop the caller's subscription on an object.
pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    Path((object, proto)): Path<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<ObjectQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let protocol = params::protocol(&proto)?;
    let session_id = params::session_id(&headers, &query)?;
    let topic = params::topic(&state, &query, &object)?;

    state
        .gateway
        .unsubscribe(session_id, topic, protocol)
        .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Write a sensor value. Only the current controller may write.
pub async fn set_value(
    State(state): State<Arc<AppState>>,
    Path((object, proto)): Path<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<ObjectQuery>,
    Json(body): Json<SetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let protocol = params::protocol(&proto)?;
    let topic = params::topic(&state, &query, &object)?;

    state
        .gateway
        .set_value(
            params::control_token(&headers, &query),
            &topic,
            protocol,
            &body.sensor_id,
            body.value,
        )
        .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}
