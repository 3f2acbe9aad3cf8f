pub mod admin;
pub mod bookings;
pub mod health;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::Router;

use crate::errors::AppError;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route(
            "/api/admin/status/sweep",
            post(admin::run_status_sweep),
        )
        .route(
            "/api/admin/status/checkins",
            post(admin::process_checkins),
        )
        .route(
            "/api/admin/status/checkouts",
            post(admin::process_checkouts),
        )
        .route(
            "/api/admin/status/last",
            get(admin::last_status_result),
        )
        .route(
            "/api/admin/messages/dispatch",
            post(admin::dispatch_due_messages),
        )
        .route(
            "/api/admin/tenants/:tenant_id/proactive-settings",
            get(admin::get_proactive_settings)
                .put(admin::update_proactive_settings),
        )
        .route(
            "/api/admin/tenants/:tenant_id/bookings",
            post(bookings::create_booking),
        )
        .route(
            "/api/admin/tenants/:tenant_id/bookings/:id",
            put(bookings::update_booking),
        )
        .route(
            "/api/admin/tenants/:tenant_id/bookings/:id/cancel",
            post(bookings::cancel_booking),
        )
        .route(
            "/api/admin/tenants/:tenant_id/bookings/:id/check-in",
            post(bookings::check_in_booking),
        )
        .route(
            "/api/admin/tenants/:tenant_id/bookings/:id/messages",
            get(bookings::list_messages),
        )
        .route(
            "/api/admin/tenants/:tenant_id/bookings/:id/messages/schedule",
            post(bookings::schedule_messages),
        )
        .route(
            "/api/admin/tenants/:tenant_id/bookings/:id/messages/cancel",
            post(bookings::cancel_messages),
        )
        .route(
            "/api/admin/tenants/:tenant_id/bookings/:id/messages/reschedule",
            post(bookings::reschedule_messages),
        )
        .with_state(state)
}

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}
