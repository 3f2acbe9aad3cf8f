use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;

use crate::db::{self, queries, Db};
use crate::models::{Booking, BookingStatus, BookingStatusUpdateResult, TransitionPass};
use crate::services::clock::{local_instant, Clock, TimezoneResolver};
use crate::services::scheduler::{get_or_create_settings_in, ProactiveScheduler};

/// Moves bookings through check-in and checkout as their local times pass.
#[derive(Clone)]
pub struct BookingStatusEngine {
    db: Db,
    clock: Arc<dyn Clock>,
    timezones: Arc<dyn TimezoneResolver>,
    scheduler: ProactiveScheduler,
    last_result: Arc<Mutex<Option<BookingStatusUpdateResult>>>,
}

#[derive(Debug, Clone, Copy)]
enum Transition {
    CheckIn,
    CheckOut,
}

impl Transition {
    fn source(&self) -> BookingStatus {
        match self {
            Transition::CheckIn => BookingStatus::Confirmed,
            Transition::CheckOut => BookingStatus::CheckedIn,
        }
    }

}

impl BookingStatusEngine {
    pub fn new(
        db: Db,
        clock: Arc<dyn Clock>,
        timezones: Arc<dyn TimezoneResolver>,
        scheduler: ProactiveScheduler,
    ) -> Self {
        Self {
            db,
            clock,
            timezones,
            scheduler,
            last_result: Arc::new(Mutex::new(None)),
        }
    }

    pub fn process_pending_checkins(&self) -> anyhow::Result<TransitionPass> {
        self.process(Transition::CheckIn)
    }

    pub fn process_pending_checkouts(&self) -> anyhow::Result<TransitionPass> {
        self.process(Transition::CheckOut)
    }

    /// Check-ins then checkouts. Never fails; problems land in the result.
    pub fn run_full_sweep(&self) -> BookingStatusUpdateResult {
        let started = Instant::now();
        let mut result = BookingStatusUpdateResult {
            executed_at: Some(self.clock.now()),
            ..Default::default()
        };

        for transition in [Transition::CheckIn, Transition::CheckOut] {
            match self.process(transition) {
                Ok(pass) => {
                    match transition {
                        Transition::CheckIn => result.checkins_processed = pass.processed,
                        Transition::CheckOut => result.checkouts_processed = pass.processed,
                    }
                    result.errors_encountered += pass.errors;
                    if pass.last_error.is_some() {
                        result.last_error = pass.last_error;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, ?transition, "status pass failed");
                    result.errors_encountered += 1;
                    result.last_error = Some(e.to_string());
                }
            }
        }
        result.duration_ms = started.elapsed().as_millis() as u64;

        if result.checkins_processed > 0 || result.checkouts_processed > 0 {
            tracing::info!(
                checkins = result.checkins_processed,
                checkouts = result.checkouts_processed,
                duration_ms = result.duration_ms,
                "booking status sweep completed"
            );
        } else {
            tracing::debug!("no booking status updates needed");
        }
        if result.errors_encountered > 0 {
            tracing::warn!(
                errors = result.errors_encountered,
                last_error = result.last_error.as_deref().unwrap_or(""),
                "booking status sweep had errors"
            );
        }

        if let Ok(mut last) = self.last_result.lock() {
            *last = Some(result.clone());
        }
        result
    }

    pub fn last_result(&self) -> Option<BookingStatusUpdateResult> {
        self.last_result.lock().ok().and_then(|r| r.clone())
    }

    fn process(&self, transition: Transition) -> anyhow::Result<TransitionPass> {
        let now = self.clock.now();
        let mut conn = db::lock(&self.db)?;

        // No timezone is more than a day ahead of UTC, so this bound is safe.
        let bound = (now + Duration::days(1)).date_naive();
        let candidates =
            queries::list_eligible_for_status_transition(&conn, transition.source(), bound)?;

        let mut pass = TransitionPass::default();
        for booking in candidates {
            match self.apply(&mut conn, &booking, transition, now) {
                Ok(Some(to)) => {
                    pass.processed += 1;
                    tracing::debug!(
                        booking_id = %booking.id,
                        tenant_id = booking.tenant_id,
                        to = to.as_str(),
                        "booking status updated automatically"
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(booking_id = %booking.id, error = %e, "failed to update booking status");
                    pass.record_error(format!("booking {}: {e}", booking.id));
                }
            }
        }

        if pass.processed > 0 {
            tracing::info!(processed = pass.processed, ?transition, "processed booking transitions");
        }
        Ok(pass)
    }

    /// The status a booking should move to now, if any. A stay whose checkout
    /// time has also passed skips CheckedIn and goes straight to CheckedOut.
    fn target_for(
        &self,
        conn: &Connection,
        booking: &Booking,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<BookingStatus>> {
        anyhow::ensure!(
            booking.has_valid_stay(),
            "checkout date {} is not after check-in date {}",
            booking.checkout_date,
            booking.checkin_date
        );

        let settings = get_or_create_settings_in(conn, booking.tenant_id, now)?.settings;
        let tz = self.timezones.resolve_timezone(booking.tenant_id);
        let checkout_at = local_instant(tz, booking.checkout_date, settings.checkout_time);
        if now >= checkout_at {
            return Ok(Some(BookingStatus::CheckedOut));
        }

        let checkin_at = local_instant(tz, booking.checkin_date, settings.checkin_time);
        Ok(match transition {
            Transition::CheckIn if now >= checkin_at => Some(BookingStatus::CheckedIn),
            _ => None,
        })
    }

    /// Apply one transition in its own transaction, together with the message
    /// changes it implies. Returns the new status, or None if nothing was due or
    /// another writer moved the booking first.
    fn apply(
        &self,
        conn: &mut Connection,
        booking: &Booking,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<BookingStatus>> {
        let Some(to) = self.target_for(conn, booking, transition, now)? else {
            return Ok(None);
        };

        let tx = conn.transaction()?;
        let checkin_at = (to == BookingStatus::CheckedIn).then_some(now);
        if !queries::transition_booking_status(&tx, booking, transition.source(), to, checkin_at, now)? {
            return Ok(None);
        }

        let mut updated = booking.clone();
        updated.status = to;
        updated.updated_at = now;
        if to == BookingStatus::CheckedIn {
            updated.actual_checkin_at = Some(now);
            self.scheduler.schedule_welcome_settled_in(&tx, &updated)?;
        } else {
            // Only the post-stay follow-up survives a checkout.
            self.scheduler.reschedule_in(&tx, updated.tenant_id, &updated)?;
        }

        tx.commit()?;
        Ok(Some(to))
    }
}

/// Staff-initiated check-in: same effects as the automatic one, at any time.
pub fn check_in_now(
    db: &Db,
    scheduler: &ProactiveScheduler,
    booking: &Booking,
) -> anyhow::Result<Booking> {
    anyhow::ensure!(
        booking.status.can_transition_to(BookingStatus::CheckedIn),
        "booking {} cannot be checked in from {}",
        booking.id,
        booking.status.as_str()
    );

    let now = scheduler.now();
    let mut conn = db::lock(db)?;
    let tx = conn.transaction()?;
    anyhow::ensure!(
        queries::transition_booking_status(
            &tx,
            booking,
            booking.status,
            BookingStatus::CheckedIn,
            Some(now),
            now
        )?,
        "booking {} changed while checking in",
        booking.id
    );

    let mut updated = booking.clone();
    updated.status = BookingStatus::CheckedIn;
    updated.actual_checkin_at = Some(now);
    updated.updated_at = now;
    scheduler.schedule_welcome_settled_in(&tx, &updated)?;
    tx.commit()?;

    tracing::info!(booking_id = %booking.id, "guest checked in by staff");
    Ok(updated)
}
