pub mod health;
pub mod orders;
pub mod payments;
pub mod tracking;
pub mod webhooks;

use crate::error::AppError;
use crate::health::HealthChecker;
use crate::middleware::auth::{AuthUser, JwtVerifier};
use crate::middleware::error::request_id_from;
use crate::services::{OrderService, PaymentOrchestrator, TrackingService, WebhookProcessor};
use axum::extract::FromRef;
use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub tracking: Arc<TrackingService>,
    pub webhooks: Arc<WebhookProcessor>,
    pub jwt: Arc<JwtVerifier>,
    pub health_checker: HealthChecker,
}

impl FromRef<AppState> for Arc<JwtVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::health))
        .route("/health/live", get(health::liveness))
        .route(
            "/api/orders",
            post(orders::create_order).get(orders::list_orders),
        )
        .route("/api/orders/seller/orders", get(orders::list_seller_orders))
        .route("/api/orders/{id}", get(orders::get_order))
        .route("/api/orders/{id}/status", put(orders::update_order_status))
        .route("/api/payments/create-intent", post(payments::create_intent))
        .route("/api/payments/paypal/execute", post(payments::execute_paypal))
        .route("/api/payments/verify/{reference}", get(payments::verify))
        .route("/api/payments/refund", post(payments::refund))
        .route("/api/payments/methods", get(payments::methods))
        .route("/api/payments/webhook", post(webhooks::handle_wrapped_webhook))
        .route(
            "/api/payments/webhook/{provider}",
            post(webhooks::handle_webhook),
        )
        .route("/api/tracking", get(tracking::list_tracked_orders))
        .route("/api/tracking/user", get(tracking::user_tracked_orders))
        .route(
            "/api/tracking/order/{order_id}",
            get(tracking::get_order_tracking).put(tracking::update_order_tracking),
        )
        .route(
            "/api/tracking/tracking/{tracking_number}",
            get(tracking::get_by_tracking_number),
        )
        .with_state(state)
}

/// Attach the request id, and the raw provider message for admin callers only
pub(crate) fn for_caller(err: AppError, user: Option<&AuthUser>, headers: &HeaderMap) -> AppError {
    let err = match user {
        Some(user) if user.role.is_admin() => match err.provider_detail().map(str::to_string) {
            Some(detail) => err.with_context(detail),
            None => err,
        },
        _ => err,
    };
    match request_id_from(headers) {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}
