use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;

use super::check_auth;
use crate::errors::AppError;
use crate::models::{
    BookingStatusUpdateResult, DispatchResult, ProactiveMessageSettings, TenantSettings,
    TransitionPass,
};
use crate::state::AppState;

// POST /api/admin/status/sweep
pub async fn run_status_sweep(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BookingStatusUpdateResult>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    tracing::info!("manual booking status sweep requested");
    Ok(Json(state.status_engine.run_full_sweep()))
}

// POST /api/admin/status/checkins
pub async fn process_checkins(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<TransitionPass>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    Ok(Json(state.status_engine.process_pending_checkins()?))
}

// POST /api/admin/status/checkouts
pub async fn process_checkouts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<TransitionPass>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    Ok(Json(state.status_engine.process_pending_checkouts()?))
}

// GET /api/admin/status/last
pub async fn last_status_result(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BookingStatusUpdateResult>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    state
        .status_engine
        .last_result()
        .map(Json)
        .ok_or_else(|| AppError::NotFound("no status sweep has run yet".to_string()))
}

// POST /api/admin/messages/dispatch
pub async fn dispatch_due_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<DispatchResult>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    Ok(Json(state.dispatcher.process_due_messages().await?))
}

// GET /api/admin/tenants/:tenant_id/proactive-settings
pub async fn get_proactive_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(tenant_id): Path<i64>,
) -> Result<Json<TenantSettings>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    Ok(Json(state.scheduler.get_or_create_settings(tenant_id)?))
}

// PUT /api/admin/tenants/:tenant_id/proactive-settings
pub async fn update_proactive_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(tenant_id): Path<i64>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<TenantSettings>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    for field in ["checkin_time", "checkout_time"] {
        if body.get(field).map_or(true, |v| v.is_null()) {
            return Err(AppError::BadRequest(format!("{field} is required")));
        }
    }
    let settings = ProactiveMessageSettings::from_json(&body.to_string())
        .map_err(|e| AppError::BadRequest(format!("invalid settings: {e}")))?;

    Ok(Json(state.scheduler.update_settings(tenant_id, &settings)?))
}
