use std::env;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::services::clock::ConfiguredTimezones;
use crate::services::dispatcher::DispatchConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_phone_number: String,
    pub scheduler: SchedulerConfig,
}

/// Everything the background sweeps need, separate from the process environment.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub hotel_name: String,
    pub default_timezone: String,
    /// `tenant=Zone` pairs, comma separated.
    pub tenant_timezones: String,
    pub dispatch_interval_secs: u64,
    pub status_sweep_interval_secs: u64,
    pub dispatch_batch_size: usize,
    pub dispatch_concurrency: usize,
    pub send_timeout_secs: u64,
    pub claim_timeout_secs: u64,
    pub max_send_attempts: u32,
    pub plan_grace_window_minutes: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            hotel_name: "Hotel".to_string(),
            default_timezone: "Africa/Johannesburg".to_string(),
            tenant_timezones: String::new(),
            dispatch_interval_secs: 300,
            status_sweep_interval_secs: 900,
            dispatch_batch_size: 50,
            dispatch_concurrency: 4,
            send_timeout_secs: 15,
            claim_timeout_secs: 120,
            max_send_attempts: 3,
            plan_grace_window_minutes: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            hotel_name: env::var("HOTEL_NAME").unwrap_or(d.hotel_name),
            default_timezone: env::var("DEFAULT_TIMEZONE").unwrap_or(d.default_timezone),
            tenant_timezones: env::var("TENANT_TIMEZONES").unwrap_or(d.tenant_timezones),
            dispatch_interval_secs: env_or("DISPATCH_INTERVAL_SECS", d.dispatch_interval_secs),
            status_sweep_interval_secs: env_or(
                "STATUS_SWEEP_INTERVAL_SECS",
                d.status_sweep_interval_secs,
            ),
            dispatch_batch_size: env_or("DISPATCH_BATCH_SIZE", d.dispatch_batch_size),
            dispatch_concurrency: env_or("DISPATCH_CONCURRENCY", d.dispatch_concurrency),
            send_timeout_secs: env_or("SEND_TIMEOUT_SECS", d.send_timeout_secs),
            claim_timeout_secs: env_or("CLAIM_TIMEOUT_SECS", d.claim_timeout_secs),
            max_send_attempts: env_or("MAX_SEND_ATTEMPTS", d.max_send_attempts),
            plan_grace_window_minutes: env_or(
                "PLAN_GRACE_WINDOW_MINUTES",
                d.plan_grace_window_minutes,
            ),
        }
    }

    pub fn timezones(&self) -> ConfiguredTimezones {
        ConfiguredTimezones::parse(&self.default_timezone, &self.tenant_timezones)
    }

    pub fn grace_window(&self) -> Duration {
        Duration::minutes(self.plan_grace_window_minutes.max(0))
    }

    /// The claim must outlive a timed-out send, so it is never shorter than
    /// the send timeout plus 30 seconds.
    pub fn dispatch_config(&self) -> DispatchConfig {
        let claim_secs = self.claim_timeout_secs.max(self.send_timeout_secs + 30);
        if claim_secs != self.claim_timeout_secs {
            tracing::warn!(
                configured = self.claim_timeout_secs,
                used = claim_secs,
                "CLAIM_TIMEOUT_SECS raised above SEND_TIMEOUT_SECS"
            );
        }
        DispatchConfig {
            batch_size: self.dispatch_batch_size.max(1),
            concurrency: self.dispatch_concurrency.max(1),
            send_timeout: StdDuration::from_secs(self.send_timeout_secs),
            claim_timeout: Duration::seconds(claim_secs as i64),
            max_attempts: self.max_send_attempts.max(1),
            hotel_name: self.hotel_name.clone(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_or("PORT", 3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "concierge.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            twilio_account_sid: env::var("TWILIO_ACCOUNT_SID").unwrap_or_default(),
            twilio_auth_token: env::var("TWILIO_AUTH_TOKEN").unwrap_or_default(),
            twilio_phone_number: env::var("TWILIO_PHONE_NUMBER").unwrap_or_default(),
            scheduler: SchedulerConfig::from_env(),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
