use chrono::{DateTime, NaiveDate, Utc};
use std::time::Duration;

/// Common date/time formats used throughout the application
pub mod formats {
    /// Human-readable format for display: "2024-01-20 15:30:00"
    pub const DISPLAY_FULL: &str = "%Y-%m-%d %H:%M:%S";
}

/// Source of the current time.
///
/// Quota accounting asks the clock for "today", so tests can move the
/// calendar forward without waiting for midnight.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Calendar day used for per-author quota accounting (UTC)
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Format a datetime for human-readable display
pub fn format_for_display(datetime: &DateTime<Utc>) -> String {
    datetime.format(formats::DISPLAY_FULL).to_string()
}

/// Get current Unix timestamp (seconds since epoch)
pub fn unix_timestamp_now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

/// Time remaining until a Unix reset timestamp, or None if it already passed
pub fn duration_until_reset(reset_unix: u64, now_unix: u64) -> Option<Duration> {
    reset_unix
        .checked_sub(now_unix)
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

/// Format an uptime as "3h07m"
pub fn format_uptime(uptime: Duration) -> String {
    let hours = uptime.as_secs() / 3600;
    let minutes = (uptime.as_secs() % 3600) / 60;
    format!("{hours}h{minutes:02}m")
}
