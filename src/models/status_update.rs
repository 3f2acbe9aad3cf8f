use chrono::{DateTime, Utc};
use serde::Serialize;

/// Summary of one status sweep. Observability only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BookingStatusUpdateResult {
    pub executed_at: Option<DateTime<Utc>>,
    pub checkins_processed: usize,
    pub checkouts_processed: usize,
    pub errors_encountered: usize,
    pub last_error: Option<String>,
    pub duration_ms: u64,
}

/// Outcome of one transition pass (check-ins or checkouts).
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransitionPass {
    pub processed: usize,
    pub errors: usize,
    pub last_error: Option<String>,
}

impl TransitionPass {
    pub fn record_error(&mut self, error: String) {
        self.errors += 1;
        self.last_error = Some(error);
    }
}

/// Summary of one due-message dispatch sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchResult {
    pub selected: usize,
    pub sent: usize,
    /// Delivery attempts that failed this sweep, retried or not.
    pub failed: usize,
    /// Rows that reached the attempt cap this sweep.
    pub terminal_failures: usize,
    pub cancelled: usize,
    /// Rows another sweep claimed first.
    pub skipped: usize,
    pub last_error: Option<String>,
    pub duration_ms: u64,
}
