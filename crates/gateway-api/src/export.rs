//! Recording download endpoints.
//!
//! | Method | Path | Content type |
//! |--------|------|--------------|
//! | `GET` | `/api/export/json` | `application/json` |
//! | `GET` | `/api/export/csv` | `text/csv` |
//! | `GET` | `/api/export/database` | `application/x-sqlite3` |
//!
//! All three accept the same optional query: `from` and `to` (RFC 3339),
//! `server` and `object`. Responses are sent as attachments with an exact
//! `Content-Length`.

use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use gateway_core::recording::ExportFilter;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

/// Build an attachment response from a finished payload.
fn attachment(body: Vec<u8>, content_type: &'static str, extension: &str) -> Response {
    let filename = format!(
        "recording-{}.{extension}",
        Utc::now().format("%Y%m%d-%H%M%S")
    );
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_owned()),
            (header::CONTENT_LENGTH, body.len().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response()
}

/// Unwrap the export query, turning a malformed one into a JSON 400.
fn export_filter(
    query: Result<Query<ExportFilter>, QueryRejection>,
) -> Result<ExportFilter, ApiError> {
    query
        .map(|Query(filter)| filter)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Export recorded data as a JSON document `{exportedAt, count, records}`.
pub async fn json(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ExportFilter>, QueryRejection>,
) -> Result<Response, ApiError> {
    let filter = export_filter(query)?;
    let export = state.gateway.recorder().export_json(&filter);
    let body = serde_json::to_vec(&export)?;
    info!(records = export.count, bytes = body.len(), "JSON export served");
    Ok(attachment(body, "application/json", "json"))
}

/// Export recorded data as CSV.
pub async fn csv(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ExportFilter>, QueryRejection>,
) -> Result<Response, ApiError> {
    let filter = export_filter(query)?;
    let body = state.gateway.recorder().export_csv(&filter).into_bytes();
    info!(bytes = body.len(), "CSV export served");
    Ok(attachment(body, "text/csv; charset=utf-8", "csv"))
}

/// Export recorded data as a standalone `SQLite` database.
pub async fn database(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ExportFilter>, QueryRejection>,
) -> Result<Response, ApiError> {
    let filter = export_filter(query)?;
    let records = state.gateway.recorder().records(&filter);
    let servers = state.gateway.servers().list();
    let body = gateway_db::export_database(&records, &servers).await?;
    Ok(attachment(body, gateway_db::CONTENT_TYPE, "db"))
}
