use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::Duration;
use futures::stream::{self, StreamExt};

use crate::db::{self, queries, Db};
use crate::models::{Booking, BookingStatus, DispatchResult, MessageState, ScheduledMessage};
use crate::services::clock::Clock;
use crate::services::messaging::MessagingProvider;
use crate::services::templates::{booking_vars, TemplateError, TemplateRenderer};

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub batch_size: usize,
    pub concurrency: usize,
    pub send_timeout: StdDuration,
    pub claim_timeout: Duration,
    pub max_attempts: u32,
    pub hotel_name: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            concurrency: 4,
            send_timeout: StdDuration::from_secs(15),
            claim_timeout: Duration::seconds(120),
            max_attempts: 3,
            hotel_name: "Hotel".to_string(),
        }
    }
}

/// Why one delivery attempt failed. Every variant counts against the attempt cap.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("booking {0} no longer exists")]
    BookingMissing(String),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("send failed: {0}")]
    Send(String),
    #[error("send timed out after {0:?}")]
    Timeout(StdDuration),
}

#[derive(Debug)]
enum RowOutcome {
    Sent,
    Retrying(String),
    Exhausted(String),
    Cancelled,
    /// Another sweep holds the claim, or took it over.
    Skipped,
    Storage(String),
}

/// Sends scheduled messages whose time has come, each exactly once.
#[derive(Clone)]
pub struct Dispatcher {
    db: Db,
    clock: Arc<dyn Clock>,
    sender: Arc<dyn MessagingProvider>,
    renderer: Arc<dyn TemplateRenderer>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        db: Db,
        clock: Arc<dyn Clock>,
        sender: Arc<dyn MessagingProvider>,
        renderer: Arc<dyn TemplateRenderer>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            db,
            clock,
            sender,
            renderer,
            config,
        }
    }

    /// Run one sweep over due rows. Only failing to read the due set is an error;
    /// per-row problems are folded into the result.
    pub async fn process_due_messages(&self) -> anyhow::Result<DispatchResult> {
        let started = Instant::now();
        let now = self.clock.now();

        let due = {
            let conn = db::lock(&self.db)?;
            queries::list_due_messages(&conn, now, self.config.batch_size)?
        };

        let mut result = DispatchResult {
            selected: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            tracing::debug!("no scheduled messages due");
            return Ok(result);
        }

        let outcomes: Vec<RowOutcome> = stream::iter(due)
            .map(|msg| self.deliver(msg))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                RowOutcome::Sent => result.sent += 1,
                RowOutcome::Retrying(e) => {
                    result.failed += 1;
                    result.last_error = Some(e);
                }
                RowOutcome::Exhausted(e) => {
                    result.failed += 1;
                    result.terminal_failures += 1;
                    result.last_error = Some(e);
                }
                RowOutcome::Cancelled => result.cancelled += 1,
                RowOutcome::Skipped => result.skipped += 1,
                RowOutcome::Storage(e) => {
                    result.failed += 1;
                    result.last_error = Some(e);
                }
            }
        }
        result.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            selected = result.selected,
            sent = result.sent,
            failed = result.failed,
            terminal = result.terminal_failures,
            cancelled = result.cancelled,
            skipped = result.skipped,
            duration_ms = result.duration_ms,
            "processed due scheduled messages"
        );
        Ok(result)
    }

    async fn deliver(&self, msg: ScheduledMessage) -> RowOutcome {
        let token = uuid::Uuid::new_v4().to_string();
        match self.try_deliver(&msg, &token).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(message_id = %msg.id, error = %e, "storage error while dispatching");
                RowOutcome::Storage(e.to_string())
            }
        }
    }

    async fn try_deliver(&self, msg: &ScheduledMessage, token: &str) -> anyhow::Result<RowOutcome> {
        let now = self.clock.now();
        let (booking, previous) = {
            let conn = db::lock(&self.db)?;
            if !queries::claim_message(&conn, &msg.id, token, now, now + self.config.claim_timeout)? {
                tracing::debug!(message_id = %msg.id, "message already claimed, skipping");
                return Ok(RowOutcome::Skipped);
            }
            let booking = queries::get_booking(&conn, msg.tenant_id, &msg.booking_id)?;
            let previous = match &booking {
                Some(b) => queries::find_previous_booking(&conn, b.tenant_id, &b.phone, &b.id, b.checkin_date)?,
                None => None,
            };
            (booking, previous)
        };

        let attempt = match booking {
            None => Err(DeliveryError::BookingMissing(msg.booking_id.clone())),
            Some(b) if b.status == BookingStatus::Cancelled => {
                return self.drop_for_cancelled_booking(msg, token);
            }
            Some(b) => self.render_and_send(msg, &b, previous.as_ref()).await,
        };

        let conn = db::lock(&self.db)?;
        match attempt {
            Ok(()) => {
                if queries::mark_message_sent(&conn, &msg.id, token, self.clock.now())? {
                    tracing::info!(
                        message_id = %msg.id,
                        booking_id = %msg.booking_id,
                        kind = msg.kind.as_str(),
                        "sent scheduled message"
                    );
                    Ok(RowOutcome::Sent)
                } else {
                    tracing::error!(message_id = %msg.id, "claim expired before the send was recorded");
                    Ok(RowOutcome::Skipped)
                }
            }
            Err(e) => {
                let error = e.to_string();
                let state = queries::record_message_failure(
                    &conn,
                    &msg.id,
                    token,
                    &error,
                    self.config.max_attempts,
                )?;
                match state {
                    Some(MessageState::Failed) => {
                        tracing::warn!(message_id = %msg.id, error = %error, "message failed permanently");
                        Ok(RowOutcome::Exhausted(error))
                    }
                    Some(_) => {
                        tracing::warn!(message_id = %msg.id, error = %error, "message delivery failed, will retry");
                        Ok(RowOutcome::Retrying(error))
                    }
                    None => Ok(RowOutcome::Skipped),
                }
            }
        }
    }

    /// Cancel a claimed row whose booking was cancelled. If the claim was
    /// lost meanwhile the row belongs to another sweep and is left alone.
    fn drop_for_cancelled_booking(&self, msg: &ScheduledMessage, token: &str) -> anyhow::Result<RowOutcome> {
        let conn = db::lock(&self.db)?;
        if !queries::cancel_claimed_message(&conn, &msg.id, token)? {
            tracing::debug!(message_id = %msg.id, "claim lost before the message could be dropped");
            return Ok(RowOutcome::Skipped);
        }
        tracing::info!(message_id = %msg.id, booking_id = %msg.booking_id, "booking cancelled, dropping message");
        Ok(RowOutcome::Cancelled)
    }

    async fn render_and_send(
        &self,
        msg: &ScheduledMessage,
        booking: &Booking,
        previous: Option<&Booking>,
    ) -> Result<(), DeliveryError> {
        let vars = booking_vars(booking, previous, &self.config.hotel_name);
        let body = self.renderer.render(msg.tenant_id, &msg.template_key, &vars)?;

        let send = self.sender.send_message(msg.tenant_id, &booking.phone, &body);
        match tokio::time::timeout(self.config.send_timeout, send).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DeliveryError::Send(e.to_string())),
            Err(_) => Err(DeliveryError::Timeout(self.config.send_timeout)),
        }
    }
}
