//! Time source and daily reset-boundary arithmetic.
//!
//! Quota and rate counters never run timers of their own. They take the
//! current time from a [`Clock`] and compare it against the boundary
//! computed here, so tests drive them with a [`ManualClock`].

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Fixed, readable starting point for tests: 2026-01-01 12:00:00 UTC.
    pub fn at_noon() -> Self {
        Self::new(DateTime::<Utc>::default() + Duration::seconds(1_767_268_800))
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Start of the quota period containing `now`, for periods that roll over
/// daily at `reset_hour` UTC.
pub fn period_start(now: DateTime<Utc>, reset_hour: u32) -> DateTime<Utc> {
    let hour = Duration::hours(i64::from(reset_hour.min(23)));
    let day = (now - hour).date_naive();
    Utc.from_utc_datetime(&day.and_time(chrono::NaiveTime::MIN)) + hour
}

/// The next reset boundary strictly after `now`.
pub fn next_reset(now: DateTime<Utc>, reset_hour: u32) -> DateTime<Utc> {
    period_start(now, reset_hour) + Duration::days(1)
}
