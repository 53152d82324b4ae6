//! Mapping from supervisor errors to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mcp_hub::HubError;
use serde_json::json;

/// HTTP-facing error: a status code plus a human-readable detail string.
/// Stack traces and stderr dumps never reach clients.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, detail)
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, detail)
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        let status = match &err {
            HubError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HubError::NotFound(_) => StatusCode::NOT_FOUND,
            HubError::ServerNotRunning { .. } | HubError::Conflict(_) => StatusCode::CONFLICT,
            HubError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            HubError::ChildGone => StatusCode::BAD_GATEWAY,
            HubError::Tool { code, .. } | HubError::Rpc { code, .. } => match code {
                // Invalid request/params from the child map to caller errors.
                -32602 | -32600 => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            HubError::Spawn { .. }
            | HubError::Handshake { .. }
            | HubError::StoreRead { .. }
            | HubError::StoreWrite { .. }
            | HubError::StoreDecode { .. }
            | HubError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}
