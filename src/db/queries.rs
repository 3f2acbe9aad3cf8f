use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{
    Booking, BookingStatus, MessageKind, MessageState, ProactiveMessageSettings,
    ScheduledMessage, TenantSettings,
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(NaiveDateTime::parse_from_str(s, TS_FORMAT)?.and_utc())
}

fn parse_opt_ts(s: Option<String>) -> anyhow::Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

fn format_date(d: &NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    Ok(NaiveDate::parse_from_str(s, DATE_FORMAT)?)
}

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, tenant_id, guest_name, phone, email, room_number, checkin_date, checkout_date, \
     status, is_repeat_guest, actual_checkin_at, created_at, updated_at";

pub fn create_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO bookings (id, tenant_id, guest_name, phone, email, room_number, checkin_date, checkout_date,
                               status, is_repeat_guest, actual_checkin_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            booking.id,
            booking.tenant_id,
            booking.guest_name,
            booking.phone,
            booking.email,
            booking.room_number,
            format_date(&booking.checkin_date),
            format_date(&booking.checkout_date),
            booking.status.as_str(),
            booking.is_repeat_guest as i32,
            booking.actual_checkin_at.as_ref().map(format_ts),
            format_ts(&booking.created_at),
            format_ts(&booking.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_booking(
    conn: &Connection,
    tenant_id: i64,
    id: &str,
) -> anyhow::Result<Option<Booking>> {
    let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE tenant_id = ?1 AND id = ?2");
    let result = conn
        .query_row(&sql, params![tenant_id, id], |row| Ok(parse_booking_row(row)))
        .optional()?;

    result.transpose()
}

/// Write every mutable field of a booking back.
pub fn update_booking(conn: &Connection, booking: &Booking, now: DateTime<Utc>) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET guest_name = ?1, phone = ?2, email = ?3, room_number = ?4,
                checkin_date = ?5, checkout_date = ?6, status = ?7, is_repeat_guest = ?8,
                actual_checkin_at = ?9, updated_at = ?10
         WHERE tenant_id = ?11 AND id = ?12",
        params![
            booking.guest_name,
            booking.phone,
            booking.email,
            booking.room_number,
            format_date(&booking.checkin_date),
            format_date(&booking.checkout_date),
            booking.status.as_str(),
            booking.is_repeat_guest as i32,
            booking.actual_checkin_at.as_ref().map(format_ts),
            format_ts(&now),
            booking.tenant_id,
            booking.id,
        ],
    )?;
    Ok(count > 0)
}

/// Compare-and-set the status; returns false if the booking no longer has `from`.
pub fn transition_booking_status(
    conn: &Connection,
    booking: &Booking,
    from: BookingStatus,
    to: BookingStatus,
    actual_checkin_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = ?1, actual_checkin_at = COALESCE(?2, actual_checkin_at), updated_at = ?3
         WHERE tenant_id = ?4 AND id = ?5 AND status = ?6",
        params![
            to.as_str(),
            actual_checkin_at.as_ref().map(format_ts),
            format_ts(&now),
            booking.tenant_id,
            booking.id,
            from.as_str(),
        ],
    )?;
    Ok(count > 0)
}

/// Candidates for a time-driven transition out of `status`.
///
/// `anchor_on_or_before` is a coarse date bound; callers apply the exact
/// tenant-local cut-off themselves.
pub fn list_eligible_for_status_transition(
    conn: &Connection,
    status: BookingStatus,
    anchor_on_or_before: NaiveDate,
) -> anyhow::Result<Vec<Booking>> {
    let date_column = match status {
        BookingStatus::CheckedIn => "checkout_date",
        _ => "checkin_date",
    };
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE status = ?1 AND {date_column} <= ?2
         ORDER BY {date_column} ASC"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![status.as_str(), format_date(&anchor_on_or_before)],
        |row| Ok(parse_booking_row(row)),
    )?;

    let mut bookings = vec![];
    for row in rows {
        match row? {
            Ok(booking) => bookings.push(booking),
            Err(e) => tracing::warn!(error = %e, "skipping unreadable booking row"),
        }
    }
    Ok(bookings)
}

/// The guest's most recent earlier stay with this tenant, matched on phone number.
/// Cancelled bookings and stays that end after `before` do not count.
pub fn find_previous_booking(
    conn: &Connection,
    tenant_id: i64,
    phone: &str,
    exclude_id: &str,
    before: NaiveDate,
) -> anyhow::Result<Option<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE tenant_id = ?1 AND phone = ?2 AND id != ?3
           AND status != 'cancelled' AND checkout_date <= ?4
         ORDER BY checkout_date DESC
         LIMIT 1"
    );
    let result = conn
        .query_row(
            &sql,
            params![tenant_id, phone, exclude_id, format_date(&before)],
            |row| Ok(parse_booking_row(row)),
        )
        .optional()?;

    result.transpose()
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let status_str: String = row.get(8)?;
    let status = BookingStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("unknown booking status: {status_str}"))?;

    Ok(Booking {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        guest_name: row.get(2)?,
        phone: row.get(3)?,
        email: row.get(4)?,
        room_number: row.get(5)?,
        checkin_date: parse_date(&row.get::<_, String>(6)?)?,
        checkout_date: parse_date(&row.get::<_, String>(7)?)?,
        status,
        is_repeat_guest: row.get::<_, i32>(9)? != 0,
        actual_checkin_at: parse_opt_ts(row.get(10)?)?,
        created_at: parse_ts(&row.get::<_, String>(11)?)?,
        updated_at: parse_ts(&row.get::<_, String>(12)?)?,
    })
}

// ── Scheduled Messages ──

const MESSAGE_COLUMNS: &str = "id, tenant_id, booking_id, kind, template_key, due_at, state, sent_at, \
     last_error, attempt_count, created_at";

/// Insert a Pending row unless the booking already has a Pending row of that kind.
///
/// Returns false when the partial unique index rejected the insert.
pub fn insert_pending_message(conn: &Connection, msg: &ScheduledMessage) -> anyhow::Result<bool> {
    let count = conn.execute(
        "INSERT OR IGNORE INTO scheduled_messages
             (id, tenant_id, booking_id, kind, template_key, due_at, state, attempt_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 0, ?7)",
        params![
            msg.id,
            msg.tenant_id,
            msg.booking_id,
            msg.kind.as_str(),
            msg.template_key,
            format_ts(&msg.due_at),
            format_ts(&msg.created_at),
        ],
    )?;
    Ok(count > 0)
}

pub fn get_message(conn: &Connection, id: &str) -> anyhow::Result<Option<ScheduledMessage>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM scheduled_messages WHERE id = ?1");
    let result = conn
        .query_row(&sql, params![id], |row| Ok(parse_message_row(row)))
        .optional()?;
    result.transpose()
}

pub fn list_messages_for_booking(
    conn: &Connection,
    booking_id: &str,
) -> anyhow::Result<Vec<ScheduledMessage>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM scheduled_messages WHERE booking_id = ?1 ORDER BY due_at ASC, created_at ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![booking_id], |row| Ok(parse_message_row(row)))?;

    let mut messages = vec![];
    for row in rows {
        messages.push(row??);
    }
    Ok(messages)
}

/// Cancel a booking's Pending rows. Rows a sweep holds a live claim on are
/// mid-send and left alone; the sweep settles them.
pub fn cancel_pending_messages(
    conn: &Connection,
    booking_id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE scheduled_messages SET state = 'cancelled', claim_token = NULL, claimed_until = NULL
         WHERE booking_id = ?1 AND state = 'pending'
           AND (claimed_until IS NULL OR claimed_until <= ?2)",
        params![booking_id, format_ts(&now)],
    )?;
    Ok(count)
}

/// Pending rows due at or before `now` that nobody holds a live claim on, earliest first.
pub fn list_due_messages(
    conn: &Connection,
    now: DateTime<Utc>,
    limit: usize,
) -> anyhow::Result<Vec<ScheduledMessage>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM scheduled_messages
         WHERE state = 'pending' AND due_at <= ?1
           AND (claimed_until IS NULL OR claimed_until <= ?1)
         ORDER BY due_at ASC
         LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![format_ts(&now), limit as i64], |row| {
        Ok(parse_message_row(row))
    })?;

    let mut messages = vec![];
    for row in rows {
        match row? {
            Ok(msg) => messages.push(msg),
            Err(e) => tracing::warn!(error = %e, "skipping unreadable scheduled message row"),
        }
    }
    Ok(messages)
}

/// Take a time-bounded claim on a Pending row. Returns false if someone else holds it.
pub fn claim_message(
    conn: &Connection,
    id: &str,
    token: &str,
    now: DateTime<Utc>,
    claimed_until: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE scheduled_messages SET claim_token = ?1, claimed_until = ?2
         WHERE id = ?3 AND state = 'pending'
           AND (claimed_until IS NULL OR claimed_until <= ?4)",
        params![token, format_ts(&claimed_until), id, format_ts(&now)],
    )?;
    Ok(count > 0)
}

/// Mark a claimed row Sent. Returns false if the claim was lost or the row left Pending.
pub fn mark_message_sent(
    conn: &Connection,
    id: &str,
    token: &str,
    sent_at: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE scheduled_messages
         SET state = 'sent', sent_at = ?1, attempt_count = attempt_count + 1,
             last_error = NULL, claim_token = NULL, claimed_until = NULL
         WHERE id = ?2 AND claim_token = ?3 AND state = 'pending'",
        params![format_ts(&sent_at), id, token],
    )?;
    Ok(count > 0)
}

/// Record a failed attempt on a claimed row, releasing the claim.
///
/// The row stays Pending until `max_attempts` is reached, then becomes Failed.
/// Returns the resulting state, or None if the claim was lost.
pub fn record_message_failure(
    conn: &Connection,
    id: &str,
    token: &str,
    error: &str,
    max_attempts: u32,
) -> anyhow::Result<Option<MessageState>> {
    let count = conn.execute(
        "UPDATE scheduled_messages
         SET attempt_count = attempt_count + 1,
             last_error = ?1,
             state = CASE WHEN attempt_count + 1 >= ?2 THEN 'failed' ELSE 'pending' END,
             claim_token = NULL, claimed_until = NULL
         WHERE id = ?3 AND claim_token = ?4 AND state = 'pending'",
        params![error, max_attempts, id, token],
    )?;
    if count == 0 {
        return Ok(None);
    }

    let state: String = conn.query_row(
        "SELECT state FROM scheduled_messages WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(MessageState::parse(&state))
}

/// Cancel a claimed row whose booking went away underneath it.
pub fn cancel_claimed_message(conn: &Connection, id: &str, token: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE scheduled_messages SET state = 'cancelled', claim_token = NULL, claimed_until = NULL
         WHERE id = ?1 AND claim_token = ?2 AND state = 'pending'",
        params![id, token],
    )?;
    Ok(count > 0)
}

fn parse_message_row(row: &rusqlite::Row) -> anyhow::Result<ScheduledMessage> {
    let kind_str: String = row.get(3)?;
    let state_str: String = row.get(6)?;

    Ok(ScheduledMessage {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        booking_id: row.get(2)?,
        kind: MessageKind::parse(&kind_str)
            .ok_or_else(|| anyhow::anyhow!("unknown message kind: {kind_str}"))?,
        template_key: row.get(4)?,
        due_at: parse_ts(&row.get::<_, String>(5)?)?,
        state: MessageState::parse(&state_str)
            .ok_or_else(|| anyhow::anyhow!("unknown message state: {state_str}"))?,
        sent_at: parse_opt_ts(row.get(7)?)?,
        last_error: row.get(8)?,
        attempt_count: row.get(9)?,
        created_at: parse_ts(&row.get::<_, String>(10)?)?,
    })
}

// ── Proactive Message Settings ──

pub fn get_settings(conn: &Connection, tenant_id: i64) -> anyhow::Result<Option<TenantSettings>> {
    let row = conn
        .query_row(
            "SELECT settings, created_at, updated_at FROM proactive_message_settings WHERE tenant_id = ?1",
            params![tenant_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((json, created_at, updated_at)) => Ok(Some(TenantSettings {
            tenant_id,
            settings: ProactiveMessageSettings::from_json(&json)?,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        })),
        None => Ok(None),
    }
}

/// Insert default settings for a tenant if it has none. Existing rows are left alone.
pub fn insert_default_settings(
    conn: &Connection,
    tenant_id: i64,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let json = ProactiveMessageSettings::default().to_json()?;
    let ts = format_ts(&now);
    conn.execute(
        "INSERT OR IGNORE INTO proactive_message_settings (tenant_id, settings, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)",
        params![tenant_id, json, ts],
    )?;
    Ok(())
}

pub fn save_settings(
    conn: &Connection,
    tenant_id: i64,
    settings: &ProactiveMessageSettings,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let json = settings.to_json()?;
    let ts = format_ts(&now);
    conn.execute(
        "INSERT INTO proactive_message_settings (tenant_id, settings, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)
         ON CONFLICT(tenant_id) DO UPDATE SET
           settings = excluded.settings,
           updated_at = excluded.updated_at",
        params![tenant_id, json, ts],
    )?;
    Ok(())
}
