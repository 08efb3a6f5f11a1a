//! Error types for solofed
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
///
/// Signature verification failures are not errors; see
/// [`crate::federation::Verification`]. `Unauthorized` and `Forbidden` only
/// carry a rejection out to the HTTP layer.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Signature missing or invalid (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Access denied (403)
    #[error("Access denied")]
    Forbidden,

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Persistence layer unavailable (500)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Stored key material cannot be decoded (500)
    #[error("Key format error: {0}")]
    KeyFormat(String),

    /// Remote actor could not be fetched (502)
    #[error("Remote fetch error: {0}")]
    RemoteFetch(String),

    /// Remote actor document could not be parsed (502)
    #[error("Malformed actor: {0}")]
    MalformedActor(String),

    /// Inbox refused the activity permanently (502)
    #[error("Delivery to {inbox} rejected: {reason}")]
    DeliveryRejected { inbox: String, reason: String },

    /// Transient failures persisted past the retry bound (502)
    #[error("Delivery to {inbox} failed after {attempts} attempts")]
    DeliveryFailed { inbox: String, attempts: u32 },

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Storage(format!("migration failed: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::Validation(_) => "validation",
            AppError::Storage(_) => "storage",
            AppError::KeyFormat(_) => "key_format",
            AppError::RemoteFetch(_) => "remote_fetch",
            AppError::MalformedActor(_) => "malformed_actor",
            AppError::DeliveryRejected { .. } => "delivery_rejected",
            AppError::DeliveryFailed { .. } => "delivery_failed",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }

    /// HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::RemoteFetch(_)
            | AppError::MalformedActor(_)
            | AppError::DeliveryRejected { .. }
            | AppError::DeliveryFailed { .. } => StatusCode::BAD_GATEWAY,
            AppError::Storage(_)
            | AppError::KeyFormat(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Server-side failures are logged here and answered with a generic
    /// message so storage or key details never leave the process.
    fn into_response(self) -> Response {
        use axum::Json;

        let status = self.status_code();
        let error_message = match &self {
            AppError::Storage(_) | AppError::KeyFormat(_) | AppError::Internal(_) => {
                tracing::error!(error = %self, kind = self.kind(), "Request failed");
                "Internal server error".to_string()
            }
            AppError::Validation(msg) => msg.clone(),
            _ => self.to_string(),
        };

        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[self.kind()]).inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
