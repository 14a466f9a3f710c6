// HTTP error handling

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use zstream_core::resolver::ResolveError;
use zstream_obs::ObsError;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    // Convenience alias
    pub fn internal(message: impl Into<String>) -> Self {
        Self::internal_server_error(message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            success: false,
            error: self.message,
        });

        (self.status, body).into_response()
    }
}

/// Convert zstream_core errors to HTTP errors
impl From<zstream_core::Error> for AppError {
    fn from(err: zstream_core::Error) -> Self {
        use zstream_core::Error;

        match err {
            Error::NotFound(msg) => AppError::not_found(msg),
            Error::InvalidInput(msg) => AppError::bad_request(msg),
            Error::NotConfigured(msg) => AppError::service_unavailable(msg),
            Error::Upstream { service, message } => {
                tracing::warn!("{} error: {}", service, message);
                AppError::internal_server_error(format!("{service}: {message}"))
            }
            Error::Http(e) => {
                tracing::warn!("Upstream HTTP error: {}", e);
                AppError::internal_server_error(format!("Upstream request failed: {e}"))
            }
            Error::Io(e) => {
                tracing::error!("IO error: {}", e);
                AppError::internal_server_error("Storage error")
            }
            Error::Serialization(e) => {
                tracing::error!("Serialization error: {}", e);
                AppError::internal_server_error("Data processing error")
            }
            Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                AppError::internal_server_error("Internal server error")
            }
        }
    }
}

/// Resolver failures carry the message straight to the caller
impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::InvalidChannel(_) => AppError::bad_request(err.to_string()),
            _ => AppError::internal_server_error(err.to_string()),
        }
    }
}

impl From<ObsError> for AppError {
    fn from(err: ObsError) -> Self {
        match err {
            ObsError::NotConnected => AppError::service_unavailable(err.to_string()),
            ObsError::Refused(reason) => AppError::bad_request(reason),
            ObsError::NotFound(_) => AppError::not_found(err.to_string()),
            _ => AppError::internal_server_error(err.to_string()),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(_: JsonRejection) -> Self {
        AppError::bad_request("invalid json body")
    }
}

/// Convert anyhow errors to HTTP errors
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Anyhow error: {}", err);
        AppError::internal_server_error("Internal server error")
    }
}
