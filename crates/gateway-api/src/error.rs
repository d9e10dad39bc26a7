//! Error types for the gateway HTTP API.
//!
//! [`ApiError`] unifies all failure modes into a single enum that
//! can be converted into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation. Every
//! error body has the shape `{"ok": false, "error": msg, "status": code}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gateway_core::adapter::AdapterError;
use gateway_core::bus::BusError;
use gateway_core::control::ControlError;
use gateway_core::error::GatewayError;
use gateway_db::DbError;

/// Errors that can occur in the HTTP API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A gateway operation failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Control arbitration refused the request.
    #[error(transparent)]
    Control(#[from] ControlError),

    /// Building the database export failed.
    #[error("database export failed: {0}")]
    Database(#[from] DbError),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A query parameter, header or body was malformed or missing.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl ApiError {
    /// HTTP status code for this error.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Gateway(GatewayError::Control(e)) | Self::Control(e) => control_status(e),
            Self::Gateway(
                GatewayError::Bus(BusError::UnknownSession { .. }) | GatewayError::NoAdapter { .. },
            )
            | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Gateway(GatewayError::Adapter(e)) => adapter_status(e),
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Database(_) | Self::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

const fn control_status(error: &ControlError) -> StatusCode {
    match error {
        ControlError::InvalidToken | ControlError::MissingToken => StatusCode::UNAUTHORIZED,
        ControlError::NotController => StatusCode::FORBIDDEN,
        ControlError::ControlTaken => StatusCode::CONFLICT,
    }
}

const fn adapter_status(error: &AdapterError) -> StatusCode {
    match error {
        AdapterError::UnknownObject { .. } | AdapterError::UnknownSensor { .. } => {
            StatusCode::NOT_FOUND
        }
        AdapterError::Unavailable { .. } | AdapterError::Rejected { .. } => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "Request failed");
        }

        let body = serde_json::json!({
            "ok": false,
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use gateway_types::SensorKey;

    use super::*;

    #[test]
    fn control_errors_map_to_auth_statuses() {
        assert_eq!(
            ApiError::from(ControlError::InvalidToken).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(GatewayError::Control(ControlError::NotController)).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(ControlError::ControlTaken).status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn adapter_errors_split_between_missing_and_upstream() {
        let missing = GatewayError::Adapter(AdapterError::UnknownSensor {
            object: String::from("SharedMemory"),
            sensor: SensorKey::Id(9),
        });
        assert_eq!(ApiError::from(missing).status(), StatusCode::NOT_FOUND);

        let offline = GatewayError::Adapter(AdapterError::Unavailable {
            message: String::from("connection refused"),
        });
        assert_eq!(ApiError::from(offline).status(), StatusCode::BAD_GATEWAY);
    }
}
