use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

pub trait TimezoneResolver: Send + Sync {
    fn resolve_timezone(&self, tenant_id: i64) -> Tz;
}

/// Timezones from configuration: one default plus per-tenant overrides.
#[derive(Debug, Clone)]
pub struct ConfiguredTimezones {
    default: Tz,
    overrides: HashMap<i64, Tz>,
}

impl ConfiguredTimezones {
    pub fn new(default: Tz) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: i64, tz: Tz) -> Self {
        self.overrides.insert(tenant_id, tz);
        self
    }

    /// Build from `DEFAULT_TIMEZONE`-style and `TENANT_TIMEZONES`-style strings.
    ///
    /// The tenant list is `id=Zone` pairs separated by commas. Unknown zones
    /// fall back to UTC (default) or are dropped (overrides), with a warning.
    pub fn parse(default: &str, tenants: &str) -> Self {
        let default_tz = parse_tz(default).unwrap_or_else(|| {
            tracing::warn!(zone = default, "unknown default timezone, using UTC");
            Tz::UTC
        });

        let mut resolver = Self::new(default_tz);
        for pair in tenants.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((id, zone)) = pair.split_once('=') else {
                tracing::warn!(entry = pair, "ignoring malformed tenant timezone entry");
                continue;
            };
            match (id.trim().parse::<i64>(), parse_tz(zone)) {
                (Ok(id), Some(tz)) => {
                    resolver.overrides.insert(id, tz);
                }
                _ => tracing::warn!(entry = pair, "ignoring invalid tenant timezone entry"),
            }
        }
        resolver
    }
}

fn parse_tz(name: &str) -> Option<Tz> {
    name.trim().parse::<Tz>().ok()
}

impl TimezoneResolver for ConfiguredTimezones {
    fn resolve_timezone(&self, tenant_id: i64) -> Tz {
        self.overrides
            .get(&tenant_id)
            .copied()
            .unwrap_or(self.default)
    }
}

/// Convert a tenant-local wall-clock time to an absolute instant.
///
/// Ambiguous times (clocks going back) take the earlier instant. Times that
/// do not exist (clocks going forward) are pushed past the gap.
pub fn local_instant(tz: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let mut probe = naive;
            for _ in 0..4 {
                probe += Duration::minutes(30);
                if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
                    return dt.with_timezone(&Utc);
                }
            }
            Utc.from_utc_datetime(&naive)
        }
    }
}
