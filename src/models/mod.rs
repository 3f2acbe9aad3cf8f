pub mod booking;
pub mod scheduled_message;
pub mod settings;
pub mod status_update;

pub use booking::{Booking, BookingStatus};
pub use scheduled_message::{Anchor, MessageKind, MessageState, ScheduledMessage};
pub use settings::{KindSettings, ProactiveMessageSettings, TenantSettings};
pub use status_update::{BookingStatusUpdateResult, DispatchResult, TransitionPass};
