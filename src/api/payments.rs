use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::info;

use super::{for_caller, AppState};
use crate::database::order_repository::Order;
use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::middleware::error::{success_response, unsuccessful_response};
use crate::services::payment_orchestrator::PaymentIntentRequest;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutePayPalRequest {
    pub payment_id: String,
    pub payer_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequestBody {
    pub transaction_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Paid orders answer 200; a payment the provider failed or has not settled answers 400
/// with `success: false` and the order as it now stands.
fn confirmation_response(order: Order) -> Response {
    let message = format!("Payment {}", order.payment_status);
    if order.payment_status.is_settled() {
        success_response(Some(&message), order).into_response()
    } else {
        unsuccessful_response(StatusCode::BAD_REQUEST, &message, order)
    }
}

/// POST /api/payments/create-intent
///
/// The intent fields sit at the top level of the body next to `success`, which is what the
/// storefront checkout reads.
pub async fn create_intent(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(request): Json<PaymentIntentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let intent = state
        .orchestrator
        .create_payment_intent(&user, request)
        .await
        .map_err(|e| for_caller(e, Some(&user), &headers))?;

    let mut body = serde_json::to_value(&intent).unwrap_or_default();
    body["success"] = serde_json::Value::Bool(true);
    body["message"] = serde_json::Value::String("Payment intent created".to_string());
    Ok(Json(body))
}

/// POST /api/payments/paypal/execute
pub async fn execute_paypal(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(request): Json<ExecutePayPalRequest>,
) -> Result<impl IntoResponse, AppError> {
    let order = state
        .orchestrator
        .execute_paypal_payment(&user, &request.payment_id, &request.payer_id)
        .await
        .map_err(|e| for_caller(e, Some(&user), &headers))?;
    Ok(confirmation_response(order))
}

/// GET /api/payments/verify/{reference}
///
/// Called from the Paystack redirect, so it is not authenticated.
pub async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    info!(reference = %reference, "payment verification requested");
    let order = state
        .orchestrator
        .verify_payment(&reference)
        .await
        .map_err(|e| for_caller(e, None, &headers))?;
    Ok(confirmation_response(order))
}

/// POST /api/payments/refund
pub async fn refund(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(request): Json<RefundRequestBody>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .orchestrator
        .refund_payment(&user, &request.transaction_id, request.reason)
        .await
        .map_err(|e| for_caller(e, Some(&user), &headers))?;
    Ok(success_response(Some("Refund processed"), outcome))
}

/// GET /api/payments/methods
pub async fn methods(State(state): State<AppState>) -> impl IntoResponse {
    success_response(None, state.orchestrator.registry().methods())
}
