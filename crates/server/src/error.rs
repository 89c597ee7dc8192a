//! Structured errors for the search proxy.
//!
//! Every variant renders as `{"code": ..., "message": ...}` with the status
//! from [`ProxyError::status_code`].

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Missing or malformed request parameters.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// The upstream search API failed or answered with a non-success status.
    #[error("UPSTREAM_ERROR: {0}")]
    Upstream(String),

    /// Persisting a registration failed.
    #[error("CACHE_ERROR: {0}")]
    Storage(#[from] shelf_core::Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::InvalidInput(_) => "INVALID_INPUT",
            ProxyError::Upstream(_) => "UPSTREAM_ERROR",
            ProxyError::Storage(e) => e.code(),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(event = "proxy.request_failed", code = self.code(), "{}", self);
        }
        let body = ErrorBody { code: self.code(), message: self.to_string() };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ProxyError::InvalidInput("q".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ProxyError::Upstream("down".into()).status_code(), StatusCode::BAD_GATEWAY);
        let storage = ProxyError::from(shelf_core::Error::MigrationFailed("x".into()));
        assert_eq!(storage.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(storage.code(), "CACHE_ERROR");
    }

    #[test]
    fn test_display_carries_code() {
        assert_eq!(ProxyError::Upstream("timeout".into()).to_string(), "UPSTREAM_ERROR: timeout");
    }
}
