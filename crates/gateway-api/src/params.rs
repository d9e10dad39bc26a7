//! Request parameters shared by several handlers.
//!
//! The browser may pass the session id and the control token either as a
//! header or as a query parameter; the header wins when both are present.

use axum::http::HeaderMap;
use gateway_types::{Protocol, ServerId, SessionId, Topic};

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the SSE session id.
pub const SESSION_HEADER: &str = "x-session-id";

/// Header carrying the control token.
pub const TOKEN_HEADER: &str = "x-control-token";

/// Query parameters accepted by object and control endpoints.
#[derive(Debug, Default, serde::Deserialize)]
pub struct ObjectQuery {
    /// Session id (alternative to the `X-Session-Id` header).
    pub session: Option<String>,
    /// Upstream server id. Optional when exactly one server is configured.
    pub server: Option<String>,
    /// Control token (alternative to the `X-Control-Token` header).
    pub token: Option<String>,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Resolve the session id from the header or the query.
///
/// # Errors
///
/// Returns [`ApiError::BadRequest`] when neither is present or the value
/// is not a UUID.
pub fn session_id(headers: &HeaderMap, query: &ObjectQuery) -> Result<SessionId, ApiError> {
    let raw = header_str(headers, SESSION_HEADER)
        .or(query.session.as_deref())
        .ok_or_else(|| ApiError::BadRequest(String::from("session id required")))?;
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid session id '{raw}': {e}")))
}

/// Resolve the control token from the header or the query, if any.
pub fn control_token<'a>(headers: &'a HeaderMap, query: &'a ObjectQuery) -> Option<&'a str> {
    header_str(headers, TOKEN_HEADER).or(query.token.as_deref())
}

/// Parse a protocol path segment (`ionc`, `modbus`, `opcua`, `uwsgate` or an alias).
///
/// # Errors
///
/// Returns [`ApiError::BadRequest`] for unknown names.
pub fn protocol(raw: &str) -> Result<Protocol, ApiError> {
    raw.parse()
        .map_err(|e: gateway_types::UnknownProtocol| ApiError::BadRequest(e.to_string()))
}

/// Resolve the target server: the `server` query parameter, or the only
/// configured server when there is exactly one.
///
/// # Errors
///
/// Returns [`ApiError::BadRequest`] when the server is ambiguous and
/// [`ApiError::NotFound`] when it is not configured.
pub fn server_id(state: &AppState, query: &ObjectQuery) -> Result<ServerId, ApiError> {
    let servers = state.gateway.servers();
    match query.server.as_deref() {
        Some(raw) => {
            let id = ServerId::from(raw);
            if servers.get(&id).is_some() {
                Ok(id)
            } else {
                Err(ApiError::NotFound(format!("server {raw}")))
            }
        }
        None => servers.sole_server().ok_or_else(|| {
            ApiError::BadRequest(String::from(
                "server parameter required when several servers are configured",
            ))
        }),
    }
}

/// Build the topic for `object` on the resolved server.
///
/// # Errors
///
/// See [`server_id`].
pub fn topic(state: &AppState, query: &ObjectQuery, object: &str) -> Result<Topic, ApiError> {
    Ok(Topic::new(server_id(state, query)?, object))
}
