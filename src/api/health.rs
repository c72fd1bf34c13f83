use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, error};

use super::AppState;

/// GET /health, also served as /health/ready
///
/// 503 carries the same report so the failing dependency is visible.
pub async fn health(State(state): State<AppState>) -> Response {
    let report = state.health_checker.check_health().await;
    debug!(status = ?report.status, "health checked");

    if report.is_available() {
        Json(report).into_response()
    } else {
        error!(status = ?report.status, "service unavailable");
        (StatusCode::SERVICE_UNAVAILABLE, Json(report)).into_response()
    }
}

/// GET /health/live
pub async fn liveness() -> &'static str {
    "OK"
}
