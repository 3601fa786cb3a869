//! Request-path failures and their JSON rendering.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Every error a handler can answer with. Rendered as `{"error": "<message>"}`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("Missing fields")]
    MissingFields,

    #[error("Invalid JSON")]
    InvalidJson,

    #[error("Missing device_id")]
    MissingDeviceId,

    #[error("Missing file")]
    MissingFile,

    #[error("{0}")]
    Multipart(String),

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Invalid API key")]
    InvalidApiKey,

    /// Telemetry does not distinguish a missing key from a wrong one.
    #[error("Missing/invalid API key")]
    TelemetryUnauthorized,

    #[error("Write failed")]
    WriteFailed,

    #[error("Not found")]
    NotFound,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingFields
            | ApiError::InvalidJson
            | ApiError::MissingDeviceId
            | ApiError::MissingFile
            | ApiError::Multipart(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingApiKey | ApiError::TelemetryUnauthorized => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::InvalidApiKey => StatusCode::FORBIDDEN,
            ApiError::WriteFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
