//! # Gateway Error Responses
//!
//! Maps the engine's typed failures onto HTTP responses carrying the
//! `{"error": {"message", "type", "code"}}` envelope clients of
//! chat-completion APIs expect. Routing failures become 404/503, upstream
//! network failures 502/504, and a forwarded upstream 4xx keeps its status
//! where it is meaningful.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use manifold_core::error::DispatchError;
use serde_json::json;
use thiserror::Error;

/// Errors a gateway handler can answer with.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Typed failures from the dispatch engine
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The request body failed validation before reaching the engine
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// A named resource does not exist
    #[error("not found: {message}")]
    NotFound { message: String },

    /// JSON serialization and deserialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GatewayError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Dispatch(e) => (
                StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::BAD_GATEWAY),
                e.kind(),
            ),
            Self::InvalidRequest { .. } => (StatusCode::BAD_REQUEST, "invalid_request"),
            Self::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            Self::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "serialization_error"),
        }
    }

    /// The envelope body, reused for in-band stream error frames.
    pub fn envelope(&self) -> serde_json::Value {
        let (status, error_type) = self.status_and_type();
        json!({
            "error": {
                "message": self.to_string(),
                "type": error_type,
                "code": status.as_u16()
            }
        })
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, _) = self.status_and_type();
        (status, Json(self.envelope())).into_response()
    }
}
