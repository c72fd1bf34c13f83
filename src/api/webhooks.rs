use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

use super::{for_caller, AppState};
use crate::error::{AppError, AppErrorKind, ValidationError};
use crate::services::webhook_processor::{WebhookDisposition, WebhookProcessor};

/// Body of the wrapped endpoint: `{ provider, payload }`
#[derive(Debug, Deserialize)]
pub struct WrappedWebhook {
    pub provider: String,
    pub payload: JsonValue,
}

/// POST /api/payments/webhook/{provider}
///
/// Signatures are computed over the body exactly as received.
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    info!(provider = %provider, "Received webhook");
    WebhookProcessor::parse_provider(&provider).map_err(|e| for_caller(e, None, &headers))?;

    let payload: JsonValue = serde_json::from_slice(&body).map_err(|e| {
        error!(provider = %provider, error = %e, "Invalid JSON payload");
        for_caller(
            ValidationError::InvalidValue {
                field: "body".to_string(),
                reason: "invalid JSON".to_string(),
            }
            .into(),
            None,
            &headers,
        )
    })?;

    process(&state, &provider, &body, &headers, &payload).await
}

/// POST /api/payments/webhook
///
/// The provider notification arrives wrapped by a relay, so the original bytes are gone;
/// the signature is checked against the compact serialization of `payload`.
pub async fn handle_wrapped_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(wrapped): Json<WrappedWebhook>,
) -> Result<impl IntoResponse, AppError> {
    info!(provider = %wrapped.provider, "Received wrapped webhook");
    WebhookProcessor::parse_provider(&wrapped.provider)
        .map_err(|e| for_caller(e, None, &headers))?;

    let raw = serde_json::to_vec(&wrapped.payload).unwrap_or_default();
    process(&state, &wrapped.provider, &raw, &headers, &wrapped.payload).await
}

async fn process(
    state: &AppState,
    provider: &str,
    raw_body: &[u8],
    headers: &HeaderMap,
    payload: &JsonValue,
) -> Result<Json<JsonValue>, AppError> {
    match state
        .webhooks
        .process_webhook(provider, raw_body, headers, payload)
        .await
    {
        Ok(disposition) => {
            if disposition == WebhookDisposition::Duplicate {
                info!(provider = %provider, "Webhook already processed");
            }
            Ok(Json(serde_json::json!({
                "received": true,
                "status": disposition,
            })))
        }
        Err(e) => {
            if matches!(e.kind, AppErrorKind::Auth(_)) {
                warn!(provider = %provider, "Invalid webhook signature");
            } else {
                // Unacknowledged, so the provider redelivers
                error!(provider = %provider, error = %e, "Webhook processing failed");
            }
            Err(for_caller(e, None, headers))
        }
    }
}
