use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::models::{Anchor, Booking, BookingStatus, MessageKind, ProactiveMessageSettings};
use crate::services::clock::local_instant;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("booking {booking_id} checks out on or before it checks in")]
    InvalidStayDates { booking_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMessage {
    pub kind: MessageKind,
    pub due_at: DateTime<Utc>,
    pub template_key: String,
}

/// Target set of messages for one booking, keyed by kind.
pub type Plan = BTreeMap<MessageKind, PlannedMessage>;

/// Compute the absolute instant a kind's offset is measured from.
pub fn anchor_instant(
    kind: MessageKind,
    booking: &Booking,
    settings: &ProactiveMessageSettings,
    tz: Tz,
) -> Option<DateTime<Utc>> {
    match kind.anchor() {
        Anchor::Checkin => Some(local_instant(tz, booking.checkin_date, settings.checkin_time)),
        Anchor::Checkout => Some(local_instant(
            tz,
            booking.checkout_date,
            settings.checkout_time,
        )),
        Anchor::ActualCheckin => booking.actual_checkin_at,
    }
}

/// Whether a booking in its current status should hear this kind at all.
fn applies_to_status(kind: MessageKind, status: BookingStatus) -> bool {
    match status {
        BookingStatus::Cancelled => false,
        BookingStatus::CheckedOut => kind == MessageKind::PostStayFollowUp,
        BookingStatus::CheckedIn => !kind.is_pre_arrival(),
        BookingStatus::Pending | BookingStatus::Confirmed => true,
    }
}

/// Build the set of (kind, due time) a booking should have at `now`.
///
/// Disabled kinds never appear. A kind whose due time is more than
/// `grace_window` in the past is dropped rather than sent late.
pub fn build_plan(
    booking: &Booking,
    settings: &ProactiveMessageSettings,
    tz: Tz,
    now: DateTime<Utc>,
    grace_window: Duration,
) -> Result<Plan, PlanError> {
    if !booking.has_valid_stay() {
        return Err(PlanError::InvalidStayDates {
            booking_id: booking.id.clone(),
        });
    }

    let cutoff = now - grace_window;
    let mut plan = Plan::new();

    for (kind, kind_settings) in settings.enabled_kinds() {
        if !applies_to_status(kind, booking.status) {
            continue;
        }
        if kind == MessageKind::MidStayCheckIn && booking.nights() < 2 {
            continue;
        }
        let Some(anchor) = anchor_instant(kind, booking, settings, tz) else {
            continue;
        };

        let due_at = anchor + kind_settings.offset();
        if due_at < cutoff {
            tracing::debug!(
                booking_id = %booking.id,
                kind = kind.as_str(),
                %due_at,
                "skipping message whose send time already passed"
            );
            continue;
        }

        plan.insert(
            kind,
            PlannedMessage {
                kind,
                due_at,
                template_key: kind_settings.template_key.clone(),
            },
        );
    }

    Ok(plan)
}
