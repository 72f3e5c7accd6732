use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed or out-of-range request parameter.
    #[error("Invalid parameter '{field}': {reason}")]
    Validation {
        /// Name of the offending parameter.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Catalog data could not be fetched.
    #[error("Upstream data error: {0}")]
    Upstream(String),

    /// Document model invariant violated at render time.
    #[error("Render error: {0}")]
    Render(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Build a validation error for a named parameter.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// HTTP status this error maps to at the boundary.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Upstream(_) | AppError::Database(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable kind, used in error document ids.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "validation",
            AppError::NotFound(_) => "not-found",
            AppError::Upstream(_) | AppError::Database(_) => "upstream",
            AppError::Render(_) => "render",
            AppError::Io(_) => "io",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(error = %self, kind = self.kind(), "Request error");
        } else {
            tracing::warn!(error = %self, kind = self.kind(), "Request rejected");
        }

        let body = crate::opds::error_document(&self);

        (
            status,
            [(header::CONTENT_TYPE, crate::opds::mime::CATALOG)],
            body,
        )
            .into_response()
    }
}

/// Result type alias for the application.
pub type Result<T> = std::result::Result<T, AppError>;
