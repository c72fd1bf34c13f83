use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{for_caller, AppState};
use crate::database::order_repository::TrackingStatus;
use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::middleware::error::success_response;
use crate::services::tracking::{OrderTracking, TrackingUpdateRequest};

/// Query parameters for GET /api/tracking
#[derive(Debug, Default, Deserialize)]
pub struct TrackingListQuery {
    pub status: Option<TrackingStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// GET /api/tracking/order/{order_id}
pub async fn get_order_tracking(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tracking = state
        .tracking
        .get_order_tracking(&user, order_id)
        .await
        .map_err(|e| for_caller(e, Some(&user), &headers))?;
    Ok(success_response(None, tracking))
}

/// PUT /api/tracking/order/{order_id}
pub async fn update_order_tracking(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    Json(request): Json<TrackingUpdateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let order = state
        .tracking
        .update_order_tracking(&user, order_id, request)
        .await
        .map_err(|e| for_caller(e, Some(&user), &headers))?;
    Ok(success_response(
        Some("Tracking updated"),
        OrderTracking::from(&order),
    ))
}

/// GET /api/tracking/user
pub async fn user_tracked_orders(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let orders = state
        .tracking
        .get_user_tracked_orders(&user)
        .await
        .map_err(|e| for_caller(e, Some(&user), &headers))?;
    Ok(success_response(None, orders))
}

/// GET /api/tracking?status=&page=&limit=
pub async fn list_tracked_orders(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Query(query): Query<TrackingListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = state
        .tracking
        .list_tracked_orders(&user, query.status, query.page, query.limit)
        .await
        .map_err(|e| for_caller(e, Some(&user), &headers))?;
    Ok(success_response(None, page))
}

/// GET /api/tracking/tracking/{tracking_number}
pub async fn get_by_tracking_number(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(tracking_number): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let tracking = state
        .tracking
        .get_by_tracking_number(&tracking_number)
        .await
        .map_err(|e| for_caller(e, None, &headers))?;
    Ok(success_response(None, tracking))
}
