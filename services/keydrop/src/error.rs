//! Admin API error responses
//!
//! Store errors become JSON bodies of the form
//! `{"error": {"type", "message", "request_id"}}` with a status picked by
//! error class.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use key_pool::Error as StoreError;
use repo_contents::Error as RemoteError;

/// A failed admin request, ready to render.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
    pub request_id: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            request_id: new_request_id(),
        }
    }

    pub fn from_store(err: &StoreError) -> Self {
        let (status, kind) = classify(err);
        Self::new(status, kind, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": self.kind,
                "message": self.message,
                "request_id": self.request_id,
            }
        });
        (
            self.status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

/// HTTP status and error type for a store error.
pub fn classify(err: &StoreError) -> (StatusCode, &'static str) {
    match err {
        StoreError::PoolEmpty(_) => (StatusCode::CONFLICT, "pool_empty"),
        StoreError::PoolMissing(_) => (StatusCode::NOT_FOUND, "pool_missing"),
        StoreError::InvalidPeriod(_) => (StatusCode::BAD_REQUEST, "invalid_period"),
        StoreError::InvalidKey(_) => (StatusCode::BAD_REQUEST, "invalid_key"),
        StoreError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
        StoreError::Remote(remote) => match remote {
            RemoteError::Auth(_) => (StatusCode::BAD_GATEWAY, "remote_auth"),
            RemoteError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            RemoteError::Transient(_) | RemoteError::Unreachable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "remote_unavailable")
            }
            RemoteError::VersionConflict(_) | RemoteError::ConflictRetriesExhausted { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "remote_conflict")
            }
            RemoteError::Unexpected(_) | RemoteError::Decode(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "remote_error")
            }
        },
    }
}
