use crate::services::{gateway_service::GatewayError, object_store::StoreError};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::MissingFile
            | GatewayError::EmptyFile
            | GatewayError::ExtensionNotAllowed(_)
            | GatewayError::InvalidFileName(_) => AppError::bad_request(err.to_string()),
            GatewayError::NotFound(_) => AppError::not_found(err.to_string()),
            GatewayError::Payload(io_err) | GatewayError::Store(StoreError::Io(io_err)) => {
                payload_error(io_err)
            }
            GatewayError::Store(store_err) => {
                tracing::error!(error = %store_err, "object store failure");
                AppError::internal("object store request failed")
            }
        }
    }
}

/// Body read failures carry the multipart error that caused them; surface
/// its status (e.g. 413 when the upload limit is hit) instead of a 500.
fn payload_error(err: io::Error) -> AppError {
    let multipart = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<MultipartError>());
    match multipart {
        Some(mp) => AppError::new(mp.status(), mp.body_text()),
        None => {
            tracing::error!(error = %err, "object store I/O failure");
            AppError::internal("object store request failed")
        }
    }
}
