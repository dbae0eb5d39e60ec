//! Clock/calendar seam.

use std::sync::Mutex;
use time::{Duration, OffsetDateTime, UtcOffset, Weekday};

pub const MINUTE_MS: i64 = 60_000;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
pub const DAY_MS: i64 = 24 * HOUR_MS;

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;

    fn now_ms(&self) -> i64 {
        to_millis(self.now())
    }
}

/// Wall clock shifted into a fixed local offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    #[must_use]
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(UtcOffset::UTC)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

/// Manually driven clock for simulations and tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, to: OffsetDateTime) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[must_use]
pub fn to_millis(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

/// Converts Unix milliseconds back into a timestamp in the given offset.
#[must_use]
pub fn from_millis(ms: i64, offset: UtcOffset) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
        .to_offset(offset)
}

#[must_use]
pub fn is_weekend(at: OffsetDateTime) -> bool {
    matches!(at.weekday(), Weekday::Saturday | Weekday::Sunday)
}

/// Millisecond timestamp of the next local midnight after `at`.
#[must_use]
pub fn end_of_day_ms(at: OffsetDateTime) -> i64 {
    let midnight = at.replace_time(time::Time::MIDNIGHT) + Duration::days(1);
    to_millis(midnight)
}

/// Smallest forward distance in hours from `from` to `to` on a 24h dial.
/// Both inputs are taken modulo 24.
#[must_use]
pub fn hours_until(from: u8, to: u8) -> u8 {
    (to % 24 + 24 - from % 24) % 24
}

/// Circular distance between two hours of the day.
#[must_use]
pub fn hour_distance(a: u8, b: u8) -> u8 {
    let d = hours_until(a, b);
    d.min(24 - d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn millis_roundtrip_keeps_resolution() {
        let at = datetime!(2026-03-14 22:15:30.250 UTC);
        let ms = to_millis(at);
        assert_eq!(from_millis(ms, UtcOffset::UTC), at);
    }

    #[test]
    fn weekend_detection() {
        assert!(is_weekend(datetime!(2026-03-14 10:00 UTC)));
        assert!(!is_weekend(datetime!(2026-03-16 10:00 UTC)));
    }

    #[test]
    fn hour_arithmetic_wraps_midnight() {
        assert_eq!(hours_until(22, 1), 3);
        assert_eq!(hours_until(5, 5), 0);
        assert_eq!(hours_until(3, 255), 12);
        assert_eq!(hours_until(250, 2), 16);
        assert_eq!(hour_distance(255, 1), 10);
        assert_eq!(hour_distance(23, 1), 2);
        assert_eq!(hour_distance(1, 23), 2);
        assert_eq!(hour_distance(0, 12), 12);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(datetime!(2026-03-14 23:30 UTC));
        clock.advance(Duration::hours(1));
        assert_eq!(clock.now().hour(), 0);
        assert_eq!(end_of_day_ms(datetime!(2026-03-14 23:30 UTC)), to_millis(datetime!(2026-03-15 0:00 UTC)));
    }
}
