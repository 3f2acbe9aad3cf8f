use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub tenant_id: i64,
    pub guest_name: String,
    pub phone: String,
    pub email: Option<String>,
    pub room_number: Option<String>,
    pub checkin_date: NaiveDate,
    pub checkout_date: NaiveDate,
    pub status: BookingStatus,
    pub is_repeat_guest: bool,
    /// Set when the guest actually checked in, by the status sweep or by staff.
    pub actual_checkin_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn nights(&self) -> i64 {
        (self.checkout_date - self.checkin_date).num_days()
    }

    pub fn has_valid_stay(&self) -> bool {
        self.checkout_date > self.checkin_date
    }

    pub fn first_name(&self) -> &str {
        self.guest_name
            .split_whitespace()
            .next()
            .unwrap_or(&self.guest_name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::CheckedIn => "checked_in",
            BookingStatus::CheckedOut => "checked_out",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "checked_in" => Some(BookingStatus::CheckedIn),
            "checked_out" => Some(BookingStatus::CheckedOut),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::CheckedOut | BookingStatus::Cancelled)
    }

    fn rank(&self) -> u8 {
        match self {
            BookingStatus::Pending => 0,
            BookingStatus::Confirmed => 1,
            BookingStatus::CheckedIn => 2,
            BookingStatus::CheckedOut => 3,
            BookingStatus::Cancelled => 4,
        }
    }

    /// Status only moves forward; cancellation is reachable from any non-terminal state.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            BookingStatus::Cancelled => true,
            _ => next.rank() > self.rank(),
        }
    }
}
