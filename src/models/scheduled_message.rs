use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of proactive messages a tenant can enable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    PreArrivalReminder,
    WelcomePreArrival,
    WelcomeSettled,
    MidStayCheckIn,
    PreCheckoutReminder,
    PostStayFollowUp,
}

/// The booking event a kind's offset is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Checkin,
    /// The moment the guest actually checked in, not the booked date.
    ActualCheckin,
    Checkout,
}

impl MessageKind {
    pub const ALL: [MessageKind; 6] = [
        MessageKind::PreArrivalReminder,
        MessageKind::WelcomePreArrival,
        MessageKind::WelcomeSettled,
        MessageKind::MidStayCheckIn,
        MessageKind::PreCheckoutReminder,
        MessageKind::PostStayFollowUp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::PreArrivalReminder => "pre_arrival_reminder",
            MessageKind::WelcomePreArrival => "welcome_pre_arrival",
            MessageKind::WelcomeSettled => "welcome_settled",
            MessageKind::MidStayCheckIn => "mid_stay_check_in",
            MessageKind::PreCheckoutReminder => "pre_checkout_reminder",
            MessageKind::PostStayFollowUp => "post_stay_follow_up",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        MessageKind::ALL.into_iter().find(|k| k.as_str() == s)
    }

    pub fn anchor(&self) -> Anchor {
        match self {
            MessageKind::PreArrivalReminder
            | MessageKind::WelcomePreArrival
            | MessageKind::MidStayCheckIn => Anchor::Checkin,
            MessageKind::WelcomeSettled => Anchor::ActualCheckin,
            MessageKind::PreCheckoutReminder | MessageKind::PostStayFollowUp => Anchor::Checkout,
        }
    }

    /// Kinds that only make sense before the guest has arrived.
    pub fn is_pre_arrival(&self) -> bool {
        matches!(
            self,
            MessageKind::PreArrivalReminder | MessageKind::WelcomePreArrival
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Pending,
    Sent,
    Cancelled,
    Failed,
}

impl MessageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageState::Pending => "pending",
            MessageState::Sent => "sent",
            MessageState::Cancelled => "cancelled",
            MessageState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MessageState::Pending),
            "sent" => Some(MessageState::Sent),
            "cancelled" => Some(MessageState::Cancelled),
            "failed" => Some(MessageState::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledMessage {
    pub id: String,
    pub tenant_id: i64,
    pub booking_id: String,
    pub kind: MessageKind,
    pub template_key: String,
    pub due_at: DateTime<Utc>,
    pub state: MessageState,
    pub sent_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
}

impl ScheduledMessage {
    pub fn new_pending(
        tenant_id: i64,
        booking_id: &str,
        kind: MessageKind,
        template_key: &str,
        due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id,
            booking_id: booking_id.to_string(),
            kind,
            template_key: template_key.to_string(),
            due_at,
            state: MessageState::Pending,
            sent_at: None,
            last_error: None,
            attempt_count: 0,
            created_at: now,
        }
    }
}
