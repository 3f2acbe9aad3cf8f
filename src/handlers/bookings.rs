use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::check_auth;
use crate::db::{self, queries};
use crate::errors::AppError;
use crate::models::{Booking, BookingStatus, ScheduledMessage};
use crate::services::plan::PlanError;
use crate::services::scheduler::{BookingWriteError, RescheduleOutcome, ScheduleOutcome};
use crate::services::status::check_in_now;
use crate::state::AppState;

fn load_booking(state: &AppState, tenant_id: i64, id: &str) -> Result<Booking, AppError> {
    let conn = db::lock(&state.db)?;
    queries::get_booking(&conn, tenant_id, id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {id}")))
}

/// Invalid stay dates and stale writes are the caller's to fix; everything else is ours.
fn scheduling_error(e: anyhow::Error) -> AppError {
    if let Some(plan) = e.downcast_ref::<PlanError>() {
        return AppError::BadRequest(plan.to_string());
    }
    match e.downcast_ref::<BookingWriteError>() {
        Some(BookingWriteError::NotFound(id)) => AppError::NotFound(format!("booking {id}")),
        Some(write) => AppError::BadRequest(write.to_string()),
        None => AppError::Internal(e),
    }
}

fn validate_stay(checkin: NaiveDate, checkout: NaiveDate) -> Result<(), AppError> {
    if checkout <= checkin {
        return Err(AppError::BadRequest(
            "checkout_date must be after checkin_date".to_string(),
        ));
    }
    Ok(())
}

// POST /api/admin/tenants/:tenant_id/bookings
#[derive(Deserialize)]
pub struct CreateBookingRequest {
    pub id: Option<String>,
    pub guest_name: String,
    pub phone: String,
    pub email: Option<String>,
    pub room_number: Option<String>,
    pub checkin_date: NaiveDate,
    pub checkout_date: NaiveDate,
    pub status: Option<BookingStatus>,
    #[serde(default)]
    pub is_repeat_guest: bool,
}

#[derive(Serialize)]
pub struct CreateBookingResponse {
    pub booking: Booking,
    pub scheduled: ScheduleOutcome,
}

pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(tenant_id): Path<i64>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<CreateBookingResponse>), AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    if req.phone.trim().is_empty() {
        return Err(AppError::BadRequest("phone is required".to_string()));
    }
    validate_stay(req.checkin_date, req.checkout_date)?;

    let now = state.scheduler.now();
    let booking = Booking {
        id: req.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        tenant_id,
        guest_name: req.guest_name,
        phone: req.phone.trim().to_string(),
        email: req.email,
        room_number: req.room_number,
        checkin_date: req.checkin_date,
        checkout_date: req.checkout_date,
        status: req.status.unwrap_or(BookingStatus::Confirmed),
        is_repeat_guest: req.is_repeat_guest,
        actual_checkin_at: None,
        created_at: now,
        updated_at: now,
    };

    let scheduled = state
        .scheduler
        .create_booking(&booking)
        .map_err(scheduling_error)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateBookingResponse { booking, scheduled }),
    ))
}

// PUT /api/admin/tenants/:tenant_id/bookings/:id
#[derive(Deserialize)]
pub struct UpdateBookingRequest {
    pub guest_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub room_number: Option<String>,
    pub checkin_date: Option<NaiveDate>,
    pub checkout_date: Option<NaiveDate>,
    pub is_repeat_guest: Option<bool>,
}

#[derive(Serialize)]
pub struct UpdateBookingResponse {
    pub booking: Booking,
    /// Present when the stay dates moved and the messages were recomputed.
    pub rescheduled: Option<RescheduleOutcome>,
}

pub async fn update_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((tenant_id, id)): Path<(i64, String)>,
    Json(req): Json<UpdateBookingRequest>,
) -> Result<Json<UpdateBookingResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let mut booking = load_booking(&state, tenant_id, &id)?;
    let dates_before = (booking.checkin_date, booking.checkout_date);

    if let Some(name) = req.guest_name {
        booking.guest_name = name;
    }
    if let Some(phone) = req.phone {
        booking.phone = phone.trim().to_string();
    }
    if req.email.is_some() {
        booking.email = req.email;
    }
    if req.room_number.is_some() {
        booking.room_number = req.room_number;
    }
    if let Some(date) = req.checkin_date {
        booking.checkin_date = date;
    }
    if let Some(date) = req.checkout_date {
        booking.checkout_date = date;
    }
    if let Some(repeat) = req.is_repeat_guest {
        booking.is_repeat_guest = repeat;
    }
    validate_stay(booking.checkin_date, booking.checkout_date)?;

    let dates_moved = dates_before != (booking.checkin_date, booking.checkout_date);
    let rescheduled = state
        .scheduler
        .save_booking(&booking, dates_moved)
        .map_err(scheduling_error)?;
    booking.updated_at = state.scheduler.now();

    Ok(Json(UpdateBookingResponse {
        booking,
        rescheduled,
    }))
}

// POST /api/admin/tenants/:tenant_id/bookings/:id/cancel
#[derive(Serialize)]
pub struct CancelBookingResponse {
    pub booking: Booking,
    pub cancelled_messages: usize,
}

pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((tenant_id, id)): Path<(i64, String)>,
) -> Result<Json<CancelBookingResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let mut booking = load_booking(&state, tenant_id, &id)?;
    if booking.status != BookingStatus::Cancelled
        && !booking.status.can_transition_to(BookingStatus::Cancelled)
    {
        return Err(AppError::BadRequest(format!(
            "booking is {} and cannot be cancelled",
            booking.status.as_str()
        )));
    }

    let cancelled_messages = state
        .scheduler
        .cancel_booking(&booking)
        .map_err(scheduling_error)?;
    if booking.status != BookingStatus::Cancelled {
        booking.status = BookingStatus::Cancelled;
        booking.updated_at = state.scheduler.now();
    }

    Ok(Json(CancelBookingResponse {
        booking,
        cancelled_messages,
    }))
}

// POST /api/admin/tenants/:tenant_id/bookings/:id/check-in
pub async fn check_in_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((tenant_id, id)): Path<(i64, String)>,
) -> Result<Json<Booking>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let booking = load_booking(&state, tenant_id, &id)?;
    if !booking.status.can_transition_to(BookingStatus::CheckedIn) {
        return Err(AppError::BadRequest(format!(
            "booking is {} and cannot be checked in",
            booking.status.as_str()
        )));
    }
    if !booking.has_valid_stay() {
        return Err(scheduling_error(
            PlanError::InvalidStayDates {
                booking_id: booking.id,
            }
            .into(),
        ));
    }

    Ok(Json(check_in_now(&state.db, &state.scheduler, &booking)?))
}

// POST /api/admin/tenants/:tenant_id/bookings/:id/messages/schedule
pub async fn schedule_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((tenant_id, id)): Path<(i64, String)>,
) -> Result<Json<ScheduleOutcome>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let booking = load_booking(&state, tenant_id, &id)?;
    let outcome = state
        .scheduler
        .schedule_messages_for_booking(tenant_id, &booking)
        .map_err(scheduling_error)?;
    Ok(Json(outcome))
}

// POST /api/admin/tenants/:tenant_id/bookings/:id/messages/cancel
pub async fn cancel_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((tenant_id, id)): Path<(i64, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let booking = load_booking(&state, tenant_id, &id)?;
    let cancelled = state.scheduler.cancel_messages_for_booking(&booking.id)?;
    Ok(Json(serde_json::json!({ "cancelled": cancelled })))
}

// POST /api/admin/tenants/:tenant_id/bookings/:id/messages/reschedule
pub async fn reschedule_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((tenant_id, id)): Path<(i64, String)>,
) -> Result<Json<RescheduleOutcome>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let booking = load_booking(&state, tenant_id, &id)?;
    let outcome = state
        .scheduler
        .reschedule_messages_for_booking(tenant_id, &booking)
        .map_err(scheduling_error)?;
    Ok(Json(outcome))
}

// GET /api/admin/tenants/:tenant_id/bookings/:id/messages
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((tenant_id, id)): Path<(i64, String)>,
) -> Result<Json<Vec<ScheduledMessage>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let booking = load_booking(&state, tenant_id, &id)?;
    Ok(Json(state.scheduler.list_messages_for_booking(&booking.id)?))
}
