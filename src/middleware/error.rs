//! JSON envelopes shared by every handler
//!
//! Errors render as `{error, message, request_id, timestamp, details?, retryable}`.
//! Successful calls use `{success: true, data, message?}`; payment confirmations that
//! did not settle use the same envelope with `success: false` and a 4xx status.

use crate::error::{AppError, ErrorCode};
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorCode,
    pub message: String,
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Provider detail; only attached for admin callers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub retryable: bool,
}

impl From<&AppError> for ErrorBody {
    fn from(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now(),
            details: error
                .context
                .as_ref()
                .map(|context| serde_json::json!({ "context": context })),
            retryable: error.is_retryable(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody::from(&self);

        if status.is_server_error() {
            tracing::error!(
                code = ?body.error,
                request_id = ?body.request_id,
                status = status.as_u16(),
                error = %self,
                "request failed"
            );
        } else {
            tracing::warn!(
                code = ?body.error,
                request_id = ?body.request_id,
                status = status.as_u16(),
                "request rejected"
            );
        }

        (status, Json(body)).into_response()
    }
}

fn envelope<T: Serialize>(success: bool, message: Option<&str>, data: T) -> serde_json::Value {
    let mut body = serde_json::json!({
        "success": success,
        "data": data,
    });
    if let Some(message) = message {
        body["message"] = serde_json::Value::String(message.to_string());
    }
    body
}

/// `{ success: true, message?, data }`
pub fn success_response<T: Serialize>(message: Option<&str>, data: T) -> Json<serde_json::Value> {
    Json(envelope(true, message, data))
}

/// `{ success: false, message, data }` with a client error status. Used when the call
/// itself worked but the payment did not go through.
pub fn unsuccessful_response<T: Serialize>(
    status: StatusCode,
    message: &str,
    data: T,
) -> Response {
    (status, Json(envelope(false, Some(message), data))).into_response()
}

pub fn request_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
