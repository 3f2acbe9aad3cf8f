use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::MessageKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Signed offset from the kind's anchor instant.
    #[serde(default)]
    pub offset_minutes: i64,
    pub template_key: String,
}

impl KindSettings {
    pub fn offset(&self) -> Duration {
        Duration::minutes(self.offset_minutes)
    }
}

/// Per-tenant proactive messaging configuration, stored as one JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveMessageSettings {
    #[serde(default = "default_checkin_time")]
    pub checkin_time: NaiveTime,
    #[serde(default = "default_checkout_time")]
    pub checkout_time: NaiveTime,
    #[serde(default = "default_kinds")]
    pub kinds: BTreeMap<MessageKind, KindSettings>,
}

fn default_checkin_time() -> NaiveTime {
    NaiveTime::from_hms_opt(14, 0, 0).unwrap_or(NaiveTime::MIN)
}

fn default_checkout_time() -> NaiveTime {
    NaiveTime::from_hms_opt(11, 0, 0).unwrap_or(NaiveTime::MIN)
}

pub fn default_kind_settings(kind: MessageKind) -> KindSettings {
    let (enabled, offset_minutes) = match kind {
        MessageKind::PreArrivalReminder => (false, -24 * 60),
        // 09:00 on arrival day with the default 14:00 check-in
        MessageKind::WelcomePreArrival => (true, -5 * 60),
        MessageKind::WelcomeSettled => (true, 30),
        // 10:00 on the second day
        MessageKind::MidStayCheckIn => (true, 20 * 60),
        // 18:00 the evening before an 11:00 checkout
        MessageKind::PreCheckoutReminder => (true, -17 * 60),
        // 10:00 the day after checkout
        MessageKind::PostStayFollowUp => (true, 23 * 60),
    };
    KindSettings {
        enabled,
        offset_minutes,
        template_key: kind.as_str().to_string(),
    }
}

fn default_kinds() -> BTreeMap<MessageKind, KindSettings> {
    MessageKind::ALL
        .into_iter()
        .map(|kind| (kind, default_kind_settings(kind)))
        .collect()
}

impl Default for ProactiveMessageSettings {
    fn default() -> Self {
        Self {
            checkin_time: default_checkin_time(),
            checkout_time: default_checkout_time(),
            kinds: default_kinds(),
        }
    }
}

impl ProactiveMessageSettings {
    /// Parse a stored document; kinds missing from it keep their defaults.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let mut settings: ProactiveMessageSettings = serde_json::from_str(json)?;
        for kind in MessageKind::ALL {
            settings
                .kinds
                .entry(kind)
                .or_insert_with(|| default_kind_settings(kind));
        }
        Ok(settings)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self, kind: MessageKind) -> Option<&KindSettings> {
        self.kinds.get(&kind)
    }

    pub fn enabled_kinds(&self) -> impl Iterator<Item = (MessageKind, &KindSettings)> {
        self.kinds
            .iter()
            .filter(|(_, s)| s.enabled)
            .map(|(k, s)| (*k, s))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantSettings {
    pub tenant_id: i64,
    #[serde(flatten)]
    pub settings: ProactiveMessageSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_kind() {
        let settings = ProactiveMessageSettings::default();
        assert_eq!(settings.kinds.len(), MessageKind::ALL.len());
        assert!(!settings.kind(MessageKind::PreArrivalReminder).unwrap().enabled);
        assert!(settings.kind(MessageKind::WelcomeSettled).unwrap().enabled);
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let json = r#"{"kinds":{"mid_stay_check_in":{"enabled":false,"offset_minutes":600,"template_key":"mid"}}}"#;
        let settings = ProactiveMessageSettings::from_json(json).unwrap();

        let mid = settings.kind(MessageKind::MidStayCheckIn).unwrap();
        assert!(!mid.enabled);
        assert_eq!(mid.template_key, "mid");
        assert_eq!(settings.checkin_time, NaiveTime::from_hms_opt(14, 0, 0).unwrap());
        assert!(settings.kind(MessageKind::PostStayFollowUp).unwrap().enabled);
    }

    #[test]
    fn test_enabled_kinds_skips_disabled() {
        let settings = ProactiveMessageSettings::default();
        let enabled: Vec<MessageKind> = settings.enabled_kinds().map(|(k, _)| k).collect();
        assert!(!enabled.contains(&MessageKind::PreArrivalReminder));
        assert_eq!(enabled.len(), 5);
    }
}
