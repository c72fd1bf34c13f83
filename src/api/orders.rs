use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{for_caller, AppState};
use crate::database::order_repository::FulfillmentStatus;
use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::middleware::error::success_response;
use crate::services::order_service::CreateOrderRequest;

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: FulfillmentStatus,
}

/// POST /api/orders
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(request): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, AppError> {
    let order = state
        .orders
        .create_order(&user, request)
        .await
        .map_err(|e| for_caller(e, Some(&user), &headers))?;
    Ok((
        StatusCode::CREATED,
        success_response(Some("Order placed successfully"), order),
    ))
}

/// GET /api/orders
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let orders = state
        .orders
        .list_user_orders(&user)
        .await
        .map_err(|e| for_caller(e, Some(&user), &headers))?;
    Ok(success_response(None, orders))
}

/// GET /api/orders/seller/orders
pub async fn list_seller_orders(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let orders = state
        .orders
        .list_seller_orders(&user)
        .await
        .map_err(|e| for_caller(e, Some(&user), &headers))?;
    Ok(success_response(None, orders))
}

/// GET /api/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let order = state
        .orders
        .get_order(&user, order_id)
        .await
        .map_err(|e| for_caller(e, Some(&user), &headers))?;
    Ok(success_response(None, order))
}

/// PUT /api/orders/{id}/status
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    Json(update): Json<StatusUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let order = state
        .orders
        .update_order_status(&user, order_id, update.status)
        .await
        .map_err(|e| for_caller(e, Some(&user), &headers))?;
    Ok(success_response(Some("Order status updated"), order))
}
