use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::Serialize;

use crate::db::{self, queries, Db};
use crate::models::{
    Booking, BookingStatus, MessageKind, MessageState, ProactiveMessageSettings,
    ScheduledMessage, TenantSettings,
};
use crate::services::clock::{Clock, TimezoneResolver};
use crate::services::plan::{build_plan, Plan};

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ScheduleOutcome {
    pub created: usize,
    pub already_present: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RescheduleOutcome {
    pub cancelled: usize,
    pub created: usize,
}

/// A booking write that lost to the current state of the row.
#[derive(Debug, thiserror::Error)]
pub enum BookingWriteError {
    #[error("booking {0} already exists")]
    AlreadyExists(String),

    #[error("booking {0}")]
    NotFound(String),

    #[error("booking {0} changed concurrently, try again")]
    Conflict(String),
}

/// Keeps a booking's persisted scheduled messages in line with its plan.
#[derive(Clone)]
pub struct ProactiveScheduler {
    db: Db,
    clock: Arc<dyn Clock>,
    timezones: Arc<dyn TimezoneResolver>,
    grace_window: Duration,
}

impl ProactiveScheduler {
    pub fn new(
        db: Db,
        clock: Arc<dyn Clock>,
        timezones: Arc<dyn TimezoneResolver>,
        grace_window: Duration,
    ) -> Self {
        Self {
            db,
            clock,
            timezones,
            grace_window,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn get_or_create_settings(&self, tenant_id: i64) -> anyhow::Result<TenantSettings> {
        let conn = db::lock(&self.db)?;
        get_or_create_settings_in(&conn, tenant_id, self.clock.now())
    }

    /// Replace a tenant's settings. Rows already Pending keep their due times.
    pub fn update_settings(
        &self,
        tenant_id: i64,
        settings: &ProactiveMessageSettings,
    ) -> anyhow::Result<TenantSettings> {
        let now = self.clock.now();
        let conn = db::lock(&self.db)?;
        queries::save_settings(&conn, tenant_id, settings, now)?;
        tracing::info!(tenant_id, "updated proactive message settings");
        get_or_create_settings_in(&conn, tenant_id, now)
    }

    /// Insert a new booking together with its initial schedule.
    pub fn create_booking(&self, booking: &Booking) -> anyhow::Result<ScheduleOutcome> {
        let mut conn = db::lock(&self.db)?;
        let tx = conn.transaction()?;
        if queries::get_booking(&tx, booking.tenant_id, &booking.id)?.is_some() {
            return Err(BookingWriteError::AlreadyExists(booking.id.clone()).into());
        }
        queries::create_booking(&tx, booking)?;
        let outcome = self.schedule_in(&tx, booking.tenant_id, booking)?;
        tx.commit()?;

        tracing::info!(booking_id = %booking.id, tenant_id = booking.tenant_id, "booking created");
        Ok(outcome)
    }

    /// Persist edited booking fields. Moved stay dates recompute the messages
    /// in the same transaction, so a failed plan leaves the old dates in place.
    pub fn save_booking(
        &self,
        booking: &Booking,
        dates_moved: bool,
    ) -> anyhow::Result<Option<RescheduleOutcome>> {
        let now = self.clock.now();
        let mut conn = db::lock(&self.db)?;
        let tx = conn.transaction()?;

        let current = queries::get_booking(&tx, booking.tenant_id, &booking.id)?
            .ok_or_else(|| BookingWriteError::NotFound(booking.id.clone()))?;
        if current.status != booking.status {
            return Err(BookingWriteError::Conflict(booking.id.clone()).into());
        }
        queries::update_booking(&tx, booking, now)?;

        let rescheduled = if dates_moved && booking.status != BookingStatus::Cancelled {
            tracing::info!(booking_id = %booking.id, "stay dates changed, rescheduling messages");
            Some(self.reschedule_in(&tx, booking.tenant_id, booking)?)
        } else {
            None
        };
        tx.commit()?;
        Ok(rescheduled)
    }

    /// Move the booking to Cancelled and cancel its Pending messages together.
    pub fn cancel_booking(&self, booking: &Booking) -> anyhow::Result<usize> {
        let now = self.clock.now();
        let mut conn = db::lock(&self.db)?;
        let tx = conn.transaction()?;

        if booking.status != BookingStatus::Cancelled
            && !queries::transition_booking_status(
                &tx,
                booking,
                booking.status,
                BookingStatus::Cancelled,
                None,
                now,
            )?
        {
            return Err(BookingWriteError::Conflict(booking.id.clone()).into());
        }
        let cancelled = cancel_in(&tx, &booking.id, now)?;
        tx.commit()?;

        tracing::info!(booking_id = %booking.id, cancelled, "booking cancelled");
        Ok(cancelled)
    }

    /// Insert rows for planned kinds the booking does not have yet. Never cancels.
    pub fn schedule_messages_for_booking(
        &self,
        tenant_id: i64,
        booking: &Booking,
    ) -> anyhow::Result<ScheduleOutcome> {
        let conn = db::lock(&self.db)?;
        self.schedule_in(&conn, tenant_id, booking)
    }

    pub fn cancel_messages_for_booking(&self, booking_id: &str) -> anyhow::Result<usize> {
        let conn = db::lock(&self.db)?;
        cancel_in(&conn, booking_id, self.clock.now())
    }

    /// Cancel every Pending row, then plan again from the booking as it is now.
    /// A row claimed by an in-flight send is kept and counts as already present.
    pub fn reschedule_messages_for_booking(
        &self,
        tenant_id: i64,
        booking: &Booking,
    ) -> anyhow::Result<RescheduleOutcome> {
        let mut conn = db::lock(&self.db)?;
        let tx = conn.transaction()?;
        let outcome = self.reschedule_in(&tx, tenant_id, booking)?;
        tx.commit()?;
        Ok(outcome)
    }

    /// Schedule only the settled-in welcome, right after the guest checked in.
    pub fn schedule_welcome_settled(&self, booking: &Booking) -> anyhow::Result<bool> {
        let conn = db::lock(&self.db)?;
        self.schedule_welcome_settled_in(&conn, booking)
    }

    pub fn list_messages_for_booking(
        &self,
        booking_id: &str,
    ) -> anyhow::Result<Vec<ScheduledMessage>> {
        let conn = db::lock(&self.db)?;
        queries::list_messages_for_booking(&conn, booking_id)
    }

    pub(crate) fn plan_in(
        &self,
        conn: &Connection,
        booking: &Booking,
    ) -> anyhow::Result<Plan> {
        let now = self.clock.now();
        let settings = get_or_create_settings_in(conn, booking.tenant_id, now)?;
        let tz = self.timezones.resolve_timezone(booking.tenant_id);
        Ok(build_plan(
            booking,
            &settings.settings,
            tz,
            now,
            self.grace_window,
        )?)
    }

    pub(crate) fn schedule_in(
        &self,
        conn: &Connection,
        tenant_id: i64,
        booking: &Booking,
    ) -> anyhow::Result<ScheduleOutcome> {
        ensure_tenant(tenant_id, booking)?;
        let plan = self.plan_in(conn, booking)?;
        let outcome = reconcile(conn, booking, &plan, self.clock.now())?;

        tracing::info!(
            booking_id = %booking.id,
            tenant_id,
            planned = plan.len(),
            created = outcome.created,
            "scheduled proactive messages"
        );
        Ok(outcome)
    }

    pub(crate) fn reschedule_in(
        &self,
        conn: &Connection,
        tenant_id: i64,
        booking: &Booking,
    ) -> anyhow::Result<RescheduleOutcome> {
        ensure_tenant(tenant_id, booking)?;
        let cancelled = cancel_in(conn, &booking.id, self.clock.now())?;
        let scheduled = self.schedule_in(conn, tenant_id, booking)?;
        Ok(RescheduleOutcome {
            cancelled,
            created: scheduled.created,
        })
    }

    pub(crate) fn schedule_welcome_settled_in(
        &self,
        conn: &Connection,
        booking: &Booking,
    ) -> anyhow::Result<bool> {
        let plan = self.plan_in(conn, booking)?;
        let Some(planned) = plan.get(&MessageKind::WelcomeSettled) else {
            tracing::debug!(booking_id = %booking.id, "welcome settled message not applicable");
            return Ok(false);
        };

        let single: Plan = [(MessageKind::WelcomeSettled, planned.clone())].into();
        let outcome = reconcile(conn, booking, &single, self.clock.now())?;
        if outcome.created > 0 {
            tracing::info!(
                booking_id = %booking.id,
                due_at = %planned.due_at,
                "scheduled welcome settled message"
            );
        }
        Ok(outcome.created > 0)
    }
}

fn ensure_tenant(tenant_id: i64, booking: &Booking) -> anyhow::Result<()> {
    anyhow::ensure!(
        booking.tenant_id == tenant_id,
        "booking {} belongs to tenant {}, not {}",
        booking.id,
        booking.tenant_id,
        tenant_id
    );
    Ok(())
}

pub(crate) fn get_or_create_settings_in(
    conn: &Connection,
    tenant_id: i64,
    now: DateTime<Utc>,
) -> anyhow::Result<TenantSettings> {
    if let Some(settings) = queries::get_settings(conn, tenant_id)? {
        return Ok(settings);
    }
    queries::insert_default_settings(conn, tenant_id, now)?;
    tracing::info!(tenant_id, "created default proactive message settings");
    queries::get_settings(conn, tenant_id)?
        .with_context(|| format!("settings for tenant {tenant_id} missing after insert"))
}

pub(crate) fn cancel_in(
    conn: &Connection,
    booking_id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<usize> {
    let cancelled = queries::cancel_pending_messages(conn, booking_id, now)?;
    if cancelled > 0 {
        tracing::info!(booking_id, cancelled, "cancelled pending messages");
    }
    Ok(cancelled)
}

/// A planned kind is satisfied by a Pending row of that kind (claimed or not),
/// or by a row that already ran its course (Sent/Failed) for the same due time.
fn is_satisfied(existing: &[ScheduledMessage], kind: MessageKind, due_at: DateTime<Utc>) -> bool {
    existing.iter().any(|m| {
        m.kind == kind
            && match m.state {
                MessageState::Pending => true,
                MessageState::Sent | MessageState::Failed => m.due_at == due_at,
                MessageState::Cancelled => false,
            }
    })
}

fn reconcile(
    conn: &Connection,
    booking: &Booking,
    plan: &Plan,
    now: DateTime<Utc>,
) -> anyhow::Result<ScheduleOutcome> {
    let existing = queries::list_messages_for_booking(conn, &booking.id)?;
    let mut outcome = ScheduleOutcome::default();

    for planned in plan.values() {
        if is_satisfied(&existing, planned.kind, planned.due_at) {
            outcome.already_present += 1;
            continue;
        }

        let msg = ScheduledMessage::new_pending(
            booking.tenant_id,
            &booking.id,
            planned.kind,
            &planned.template_key,
            planned.due_at,
            now,
        );
        if queries::insert_pending_message(conn, &msg)? {
            tracing::debug!(
                booking_id = %booking.id,
                kind = planned.kind.as_str(),
                due_at = %planned.due_at,
                "created scheduled message"
            );
            outcome.created += 1;
        } else {
            // Lost a race with another writer for the same (booking, kind).
            outcome.already_present += 1;
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::{NaiveDate, TimeZone};
    use chrono_tz::Tz;

    use crate::models::BookingStatus;
    use crate::services::clock::{ConfiguredTimezones, ManualClock};

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn setup(now: DateTime<Utc>) -> (ProactiveScheduler, Arc<ManualClock>, Db) {
        let db: Db = Arc::new(Mutex::new(db::init_db(":memory:").unwrap()));
        let clock = Arc::new(ManualClock::new(now));
        let scheduler = ProactiveScheduler::new(
            db.clone(),
            clock.clone(),
            Arc::new(ConfiguredTimezones::new(Tz::UTC)),
            Duration::minutes(30),
        );
        (scheduler, clock, db)
    }

    fn insert_booking(db: &Db, id: &str) -> Booking {
        let created = utc(2024, 5, 1, 0, 0);
        let booking = Booking {
            id: id.to_string(),
            tenant_id: 1,
            guest_name: "Grace Hopper".to_string(),
            phone: "+15550002222".to_string(),
            email: None,
            room_number: Some("7".to_string()),
            checkin_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            checkout_date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            status: BookingStatus::Confirmed,
            is_repeat_guest: false,
            actual_checkin_at: None,
            created_at: created,
            updated_at: created,
        };
        queries::create_booking(&db.lock().unwrap(), &booking).unwrap();
        booking
    }

    fn two_kind_settings() -> ProactiveMessageSettings {
        let mut settings = ProactiveMessageSettings::default();
        for (kind, s) in settings.kinds.iter_mut() {
            s.enabled = matches!(
                kind,
                MessageKind::WelcomePreArrival | MessageKind::PreCheckoutReminder
            );
        }
        settings.kinds.get_mut(&MessageKind::WelcomePreArrival).unwrap().offset_minutes = -120;
        settings.kinds.get_mut(&MessageKind::PreCheckoutReminder).unwrap().offset_minutes = -180;
        settings
    }

    fn pending(messages: &[ScheduledMessage]) -> Vec<&ScheduledMessage> {
        messages.iter().filter(|m| m.state == MessageState::Pending).collect()
    }

    #[test]
    fn test_schedule_creates_planned_rows() {
        let (scheduler, _clock, db) = setup(utc(2024, 5, 20, 0, 0));
        let booking = insert_booking(&db, "bk-1");
        scheduler.update_settings(1, &two_kind_settings()).unwrap();

        let outcome = scheduler.schedule_messages_for_booking(1, &booking).unwrap();
        assert_eq!(outcome, ScheduleOutcome { created: 2, already_present: 0 });

        let messages = scheduler.list_messages_for_booking("bk-1").unwrap();
        assert_eq!(pending(&messages).len(), 2);
        let welcome = messages.iter().find(|m| m.kind == MessageKind::WelcomePreArrival).unwrap();
        assert_eq!(welcome.due_at, utc(2024, 6, 1, 12, 0));
        let pre_checkout = messages.iter().find(|m| m.kind == MessageKind::PreCheckoutReminder).unwrap();
        assert_eq!(pre_checkout.due_at, utc(2024, 6, 3, 8, 0));
    }

    #[test]
    fn test_schedule_twice_is_idempotent() {
        let (scheduler, _clock, db) = setup(utc(2024, 5, 20, 0, 0));
        let booking = insert_booking(&db, "bk-1");

        let first = scheduler.schedule_messages_for_booking(1, &booking).unwrap();
        let second = scheduler.schedule_messages_for_booking(1, &booking).unwrap();
        assert!(first.created > 0);
        assert_eq!(second.created, 0);
        assert_eq!(second.already_present, first.created);
    }

    #[test]
    fn test_schedule_rejects_foreign_tenant() {
        let (scheduler, _clock, db) = setup(utc(2024, 5, 20, 0, 0));
        let booking = insert_booking(&db, "bk-1");
        assert!(scheduler.schedule_messages_for_booking(2, &booking).is_err());
    }

    #[test]
    fn test_cancel_leaves_sent_rows_alone() {
        let (scheduler, _clock, db) = setup(utc(2024, 5, 20, 0, 0));
        let booking = insert_booking(&db, "bk-1");
        scheduler.update_settings(1, &two_kind_settings()).unwrap();
        scheduler.schedule_messages_for_booking(1, &booking).unwrap();

        let welcome_id = scheduler
            .list_messages_for_booking("bk-1")
            .unwrap()
            .into_iter()
            .find(|m| m.kind == MessageKind::WelcomePreArrival)
            .unwrap()
            .id;
        {
            let conn = db.lock().unwrap();
            let now = utc(2024, 6, 1, 12, 0);
            assert!(queries::claim_message(&conn, &welcome_id, "t", now, now + Duration::minutes(2)).unwrap());
            assert!(queries::mark_message_sent(&conn, &welcome_id, "t", now).unwrap());
        }

        assert_eq!(scheduler.cancel_messages_for_booking("bk-1").unwrap(), 1);
        let messages = scheduler.list_messages_for_booking("bk-1").unwrap();
        assert!(pending(&messages).is_empty());
        let welcome = messages.iter().find(|m| m.id == welcome_id).unwrap();
        assert_eq!(welcome.state, MessageState::Sent);
    }

    #[test]
    fn test_reschedule_moves_due_times_with_dates() {
        let (scheduler, _clock, db) = setup(utc(2024, 5, 20, 0, 0));
        let mut booking = insert_booking(&db, "bk-1");
        scheduler.update_settings(1, &two_kind_settings()).unwrap();
        scheduler.schedule_messages_for_booking(1, &booking).unwrap();

        booking.checkin_date = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        booking.checkout_date = NaiveDate::from_ymd_opt(2024, 6, 12).unwrap();
        let outcome = scheduler.reschedule_messages_for_booking(1, &booking).unwrap();
        assert_eq!(outcome, RescheduleOutcome { cancelled: 2, created: 2 });

        let messages = scheduler.list_messages_for_booking("bk-1").unwrap();
        let live = pending(&messages);
        assert_eq!(live.len(), 2);
        let mut due: Vec<_> = live.iter().map(|m| m.due_at).collect();
        due.sort();
        assert_eq!(due, vec![utc(2024, 6, 10, 12, 0), utc(2024, 6, 12, 8, 0)]);
    }

    #[test]
    fn test_settings_update_does_not_touch_pending_rows() {
        let (scheduler, _clock, db) = setup(utc(2024, 5, 20, 0, 0));
        let booking = insert_booking(&db, "bk-1");
        scheduler.update_settings(1, &two_kind_settings()).unwrap();
        scheduler.schedule_messages_for_booking(1, &booking).unwrap();

        let mut changed = two_kind_settings();
        changed.kinds.get_mut(&MessageKind::WelcomePreArrival).unwrap().offset_minutes = -600;
        scheduler.update_settings(1, &changed).unwrap();
        scheduler.schedule_messages_for_booking(1, &booking).unwrap();

        let messages = scheduler.list_messages_for_booking("bk-1").unwrap();
        let welcome: Vec<_> = messages
            .iter()
            .filter(|m| m.kind == MessageKind::WelcomePreArrival)
            .collect();
        assert_eq!(welcome.len(), 1);
        assert_eq!(welcome[0].due_at, utc(2024, 6, 1, 12, 0));
    }

    #[test]
    fn test_welcome_settled_scheduled_once_after_checkin() {
        let now = utc(2024, 6, 1, 14, 5);
        let (scheduler, _clock, db) = setup(now);
        let mut booking = insert_booking(&db, "bk-1");

        // Not checked in yet: nothing to schedule.
        assert!(!scheduler.schedule_welcome_settled(&booking).unwrap());

        booking.status = BookingStatus::CheckedIn;
        booking.actual_checkin_at = Some(now);
        assert!(scheduler.schedule_welcome_settled(&booking).unwrap());
        assert!(!scheduler.schedule_welcome_settled(&booking).unwrap());

        let messages = scheduler.list_messages_for_booking("bk-1").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, MessageKind::WelcomeSettled);
        assert_eq!(messages[0].due_at, now + Duration::minutes(30));
    }

    fn claim(db: &Db, booking_id: &str, kind: MessageKind, token: &str, now: DateTime<Utc>) -> String {
        let conn = db.lock().unwrap();
        let id = queries::list_messages_for_booking(&conn, booking_id)
            .unwrap()
            .into_iter()
            .find(|m| m.kind == kind && m.state == MessageState::Pending)
            .unwrap()
            .id;
        assert!(queries::claim_message(&conn, &id, token, now, now + Duration::minutes(2)).unwrap());
        id
    }

    #[test]
    fn test_reschedule_during_send_keeps_claimed_row() {
        let now = utc(2024, 6, 1, 12, 5);
        let (scheduler, _clock, db) = setup(now);
        let booking = insert_booking(&db, "bk-1");
        scheduler.update_settings(1, &two_kind_settings()).unwrap();
        scheduler.schedule_messages_for_booking(1, &booking).unwrap();

        let welcome_id = claim(&db, "bk-1", MessageKind::WelcomePreArrival, "sweep", now);

        let outcome = scheduler.reschedule_messages_for_booking(1, &booking).unwrap();
        assert_eq!(outcome, RescheduleOutcome { cancelled: 1, created: 1 });

        // The sweep that holds the claim can still record its send.
        assert!(queries::mark_message_sent(&db.lock().unwrap(), &welcome_id, "sweep", now).unwrap());

        let messages = scheduler.list_messages_for_booking("bk-1").unwrap();
        let welcome: Vec<_> = messages
            .iter()
            .filter(|m| m.kind == MessageKind::WelcomePreArrival)
            .collect();
        assert_eq!(welcome.len(), 1);
        assert_eq!(welcome[0].id, welcome_id);
        assert_eq!(welcome[0].state, MessageState::Sent);
    }

    #[test]
    fn test_cancel_during_send_lets_send_finish() {
        let now = utc(2024, 6, 1, 12, 5);
        let (scheduler, _clock, db) = setup(now);
        let booking = insert_booking(&db, "bk-1");
        scheduler.update_settings(1, &two_kind_settings()).unwrap();
        scheduler.schedule_messages_for_booking(1, &booking).unwrap();

        let welcome_id = claim(&db, "bk-1", MessageKind::WelcomePreArrival, "sweep", now);
        assert_eq!(scheduler.cancel_messages_for_booking("bk-1").unwrap(), 1);
        assert!(queries::mark_message_sent(&db.lock().unwrap(), &welcome_id, "sweep", now).unwrap());

        let messages = scheduler.list_messages_for_booking("bk-1").unwrap();
        assert!(pending(&messages).is_empty());
    }

    #[test]
    fn test_create_booking_inserts_row_and_schedule() {
        let (scheduler, _clock, db) = setup(utc(2024, 5, 20, 0, 0));
        let mut booking = insert_booking(&db, "bk-1");
        booking.id = "bk-2".to_string();

        let outcome = scheduler.create_booking(&booking).unwrap();
        assert!(outcome.created > 0);
        assert!(queries::get_booking(&db.lock().unwrap(), 1, "bk-2").unwrap().is_some());

        let err = scheduler.create_booking(&booking).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BookingWriteError>(),
            Some(BookingWriteError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_failed_reschedule_rolls_back_date_change() {
        let (scheduler, _clock, db) = setup(utc(2024, 5, 20, 0, 0));
        let mut booking = insert_booking(&db, "bk-1");
        scheduler.schedule_messages_for_booking(1, &booking).unwrap();
        let before = scheduler.list_messages_for_booking("bk-1").unwrap();

        db.lock()
            .unwrap()
            .execute("UPDATE proactive_message_settings SET settings = 'not json'", [])
            .unwrap();

        booking.checkin_date = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        booking.checkout_date = NaiveDate::from_ymd_opt(2024, 6, 12).unwrap();
        assert!(scheduler.save_booking(&booking, true).is_err());

        let stored = queries::get_booking(&db.lock().unwrap(), 1, "bk-1").unwrap().unwrap();
        assert_eq!(stored.checkin_date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        let after = scheduler.list_messages_for_booking("bk-1").unwrap();
        assert_eq!(pending(&after).len(), pending(&before).len());
    }

    #[test]
    fn test_save_booking_refuses_stale_status() {
        let (scheduler, _clock, db) = setup(utc(2024, 5, 20, 0, 0));
        let mut booking = insert_booking(&db, "bk-1");
        scheduler.cancel_booking(&booking).unwrap();

        booking.room_number = Some("8".to_string());
        let err = scheduler.save_booking(&booking, false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BookingWriteError>(),
            Some(BookingWriteError::Conflict(_))
        ));
    }

    #[test]
    fn test_cancel_booking_cancels_messages_together() {
        let (scheduler, _clock, db) = setup(utc(2024, 5, 20, 0, 0));
        let booking = insert_booking(&db, "bk-1");
        let scheduled = scheduler.schedule_messages_for_booking(1, &booking).unwrap();

        assert_eq!(scheduler.cancel_booking(&booking).unwrap(), scheduled.created);
        let stored = queries::get_booking(&db.lock().unwrap(), 1, "bk-1").unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);

        // The copy in hand is stale now.
        assert!(scheduler.cancel_booking(&booking).is_err());
    }

    #[test]
    fn test_settings_created_lazily_with_defaults() {
        let (scheduler, _clock, _db) = setup(utc(2024, 5, 20, 0, 0));
        let settings = scheduler.get_or_create_settings(9).unwrap();
        assert_eq!(settings.tenant_id, 9);
        assert_eq!(settings.settings.kinds.len(), MessageKind::ALL.len());
        let again = scheduler.get_or_create_settings(9).unwrap();
        assert_eq!(again.created_at, settings.created_at);
    }
}
