//! HTTP error and success envelopes
//!
//! Every response body carries a `success` flag. Errors add a user-facing
//! message and a machine-readable code; internal detail stays in the logs.

use crate::error::{AppError, ErrorCode};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tracing::{error, warn};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(
                code = ?self.error_code(),
                context = ?self.context,
                request_id = ?self.request_id,
                "request failed: {:?}",
                self.kind
            );
        } else {
            warn!(
                status = %status,
                code = ?self.error_code(),
                "request rejected: {}",
                self.user_message()
            );
        }

        let body = ErrorResponse {
            success: false,
            error: self.user_message(),
            code: Some(self.error_code()),
        };
        (status, Json(body)).into_response()
    }
}

/// `{ "success": true, "data": ... }` with the given status.
pub fn success_response<T: Serialize>(status: StatusCode, data: T) -> Response {
    (status, Json(json!({ "success": true, "data": data }))).into_response()
}
