use std::collections::{BTreeMap, HashMap};

use crate::models::{Booking, MessageKind};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("no template '{key}' for tenant {tenant_id}")]
    MissingTemplate { tenant_id: i64, key: String },
}

pub type TemplateVars = BTreeMap<&'static str, String>;

pub trait TemplateRenderer: Send + Sync {
    fn render(
        &self,
        tenant_id: i64,
        template_key: &str,
        vars: &TemplateVars,
    ) -> Result<String, TemplateError>;
}

/// Variables available to every proactive message template.
///
/// `previous` is the guest's most recent earlier stay, if any. Either it or the
/// booking's own repeat-guest flag turns the welcome into a welcome back.
pub fn booking_vars(booking: &Booking, previous: Option<&Booking>, hotel_name: &str) -> TemplateVars {
    let previous_room = previous
        .and_then(|p| p.room_number.as_deref())
        .filter(|room| !room.is_empty());

    let welcome_line = if booking.is_repeat_guest || previous.is_some() {
        let mut line = format!("Welcome back to {hotel_name}! We're delighted to see you again.");
        if let Some(room) = previous_room {
            line.push_str(&format!(" Last time you stayed in room {room} - we've noted your preferences."));
        }
        line
    } else {
        format!("Your room at {hotel_name} is being prepared for your arrival today.")
    };

    TemplateVars::from([
        ("guest_name", booking.guest_name.clone()),
        ("guest_first_name", booking.first_name().to_string()),
        ("hotel_name", hotel_name.to_string()),
        (
            "room_number",
            booking.room_number.clone().unwrap_or_default(),
        ),
        (
            "checkin_date",
            booking.checkin_date.format("%A, %B %-d").to_string(),
        ),
        (
            "checkout_date",
            booking.checkout_date.format("%A, %B %-d").to_string(),
        ),
        ("nights", booking.nights().to_string()),
        ("previous_room_number", previous_room.unwrap_or_default().to_string()),
        ("welcome_line", welcome_line),
    ])
}

/// Replace every `{name}` placeholder; unknown placeholders are left as-is.
pub fn substitute(template: &str, vars: &TemplateVars) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

/// Built-in bodies for the default template keys, with optional per-tenant overrides.
pub struct BuiltinTemplates {
    defaults: HashMap<String, String>,
    overrides: HashMap<(i64, String), String>,
}

impl BuiltinTemplates {
    pub fn new() -> Self {
        let defaults = MessageKind::ALL
            .into_iter()
            .map(|kind| (kind.as_str().to_string(), default_body(kind).to_string()))
            .collect();
        Self {
            defaults,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, tenant_id: i64, key: &str, body: &str) -> Self {
        self.overrides
            .insert((tenant_id, key.to_string()), body.to_string());
        self
    }
}

impl Default for BuiltinTemplates {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer for BuiltinTemplates {
    fn render(
        &self,
        tenant_id: i64,
        template_key: &str,
        vars: &TemplateVars,
    ) -> Result<String, TemplateError> {
        let body = self
            .overrides
            .get(&(tenant_id, template_key.to_string()))
            .or_else(|| self.defaults.get(template_key))
            .ok_or_else(|| TemplateError::MissingTemplate {
                tenant_id,
                key: template_key.to_string(),
            })?;
        Ok(substitute(body, vars))
    }
}

fn default_body(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::PreArrivalReminder => {
            "Hi {guest_first_name}, a reminder that your stay at {hotel_name} starts tomorrow, {checkin_date}. Reply if you need anything before you arrive."
        }
        MessageKind::WelcomePreArrival => {
            "Good morning {guest_first_name}! {welcome_line}\n\nCheck-in: {checkin_date}, from 2:00 PM.\n\nNeed early check-in or have special requests? Just reply to this message!"
        }
        MessageKind::WelcomeSettled => {
            "Welcome, {guest_first_name}! We hope you're settling in nicely. If anything in your room isn't right, reply here and we'll sort it out."
        }
        MessageKind::MidStayCheckIn => {
            "Good morning {guest_first_name}! How's your stay so far? Let us know if there's anything we can do to make it even better."
        }
        MessageKind::PreCheckoutReminder => {
            "Hi {guest_first_name}, just a reminder that checkout is on {checkout_date} at 11:00 AM. Need a late checkout or help with luggage? Just ask!"
        }
        MessageKind::PostStayFollowUp => {
            "Hi {guest_first_name}, thank you for staying with us at {hotel_name}! How was your stay? Reply with a number from 1-10."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    use crate::models::BookingStatus;

    fn booking(repeat: bool) -> Booking {
        Booking {
            id: "bk-1".to_string(),
            tenant_id: 1,
            guest_name: "Nomsa Dlamini".to_string(),
            phone: "+27820000000".to_string(),
            email: None,
            room_number: Some("204".to_string()),
            checkin_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            checkout_date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            status: BookingStatus::Confirmed,
            is_repeat_guest: repeat,
            actual_checkin_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_render_default_template() {
        let templates = BuiltinTemplates::new();
        let vars = booking_vars(&booking(false), None, "Sea Point Lodge");
        let text = templates.render(1, "welcome_pre_arrival", &vars).unwrap();

        assert!(text.starts_with("Good morning Nomsa!"));
        assert!(text.contains("Your room at Sea Point Lodge"));
        assert!(text.contains("Saturday, June 1"));
    }

    #[test]
    fn test_repeat_guest_gets_welcome_back() {
        let vars = booking_vars(&booking(true), None, "Sea Point Lodge");
        assert!(vars["welcome_line"].starts_with("Welcome back"));
        assert!(!vars["welcome_line"].contains("Last time"));
        assert_eq!(vars["previous_room_number"], "");
    }

    #[test]
    fn test_previous_stay_mentions_last_room() {
        let mut previous = booking(false);
        previous.id = "bk-0".to_string();
        previous.room_number = Some("31".to_string());

        // The flag is not set; the earlier stay alone marks a returning guest.
        let vars = booking_vars(&booking(false), Some(&previous), "Sea Point Lodge");
        assert_eq!(
            vars["welcome_line"],
            "Welcome back to Sea Point Lodge! We're delighted to see you again. \
             Last time you stayed in room 31 - we've noted your preferences."
        );
        assert_eq!(vars["previous_room_number"], "31");

        previous.room_number = None;
        let vars = booking_vars(&booking(false), Some(&previous), "Sea Point Lodge");
        assert!(vars["welcome_line"].ends_with("see you again."));
    }

    #[test]
    fn test_tenant_override_wins() {
        let templates = BuiltinTemplates::new().with_override(2, "post_stay_follow_up", "Bye {guest_first_name}");
        let vars = booking_vars(&booking(false), None, "X");
        assert_eq!(templates.render(2, "post_stay_follow_up", &vars).unwrap(), "Bye Nomsa");
        assert_ne!(templates.render(1, "post_stay_follow_up", &vars).unwrap(), "Bye Nomsa");
    }

    #[test]
    fn test_missing_template_is_an_error() {
        let templates = BuiltinTemplates::new();
        let err = templates.render(1, "nope", &TemplateVars::new()).unwrap_err();
        assert_eq!(err, TemplateError::MissingTemplate { tenant_id: 1, key: "nope".to_string() });
    }
}
