//! Injectable clock and registry time helpers.
//!
//! All registry timestamps are Unix seconds. Flows never read the system
//! time directly; they receive a [`Clock`] so tests can pin "now".

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Months, Utc};

use crate::error::{Error, Result};

/// Sentinel for "never": `9999-12-31T23:59:59Z`.
pub const END_OF_TIME: i64 = 253_402_300_799;

/// Earliest representable registry time.
pub const START_OF_TIME: i64 = 0;

/// Seconds in one day.
pub const DAY: i64 = 24 * 60 * 60;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current time as Unix seconds.
    fn now(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[allow(clippy::cast_possible_wrap)]
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug, Default)]
pub struct FakeClock {
    now: AtomicI64,
}

impl FakeClock {
    pub const fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn advance_days(&self, days: i64) {
        self.advance(days * DAY);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Add calendar years to a timestamp. Feb 29 rolls back to Feb 28.
pub fn plus_years(time: i64, years: u32) -> Result<i64> {
    let start = DateTime::<Utc>::from_timestamp(time, 0).ok_or(Error::TimeRange(time))?;
    let shifted = start
        .checked_add_months(Months::new(years.saturating_mul(12)))
        .ok_or(Error::TimeRange(time))?;
    Ok(shifted.timestamp().min(END_OF_TIME))
}

/// Subtract calendar years from a timestamp.
pub fn minus_years(time: i64, years: u32) -> Result<i64> {
    let start = DateTime::<Utc>::from_timestamp(time, 0).ok_or(Error::TimeRange(time))?;
    let shifted = start
        .checked_sub_months(Months::new(years.saturating_mul(12)))
        .ok_or(Error::TimeRange(time))?;
    Ok(shifted.timestamp())
}

/// RFC 3339 rendering used in log fields and poll message text.
pub fn format_time(time: i64) -> String {
    DateTime::<Utc>::from_timestamp(time, 0)
        .map_or_else(|| time.to_string(), |t| t.to_rfc3339())
}

/// Parse an RFC 3339 timestamp into Unix seconds.
pub fn parse_time(input: &str) -> Result<i64> {
    DateTime::parse_from_rfc3339(input)
        .map(|t| t.timestamp())
        .map_err(|e| Error::Config(format!("invalid timestamp {input}: {e}")))
}
