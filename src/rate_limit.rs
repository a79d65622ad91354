//! Per-provider request admission.
//!
//! Each provider gets a `governor` GCRA limiter with a `Quota::per_minute`
//! budget. The limiter runs on a relative clock that is advanced to the
//! timestamps callers pass in, so admission follows the injected
//! [`Clock`](crate::clock::Clock) rather than wall time. A full burst
//! followed by steady replenishment can admit close to twice the quota
//! inside one rolling minute, so admissions are also checked against a
//! 60-second sliding log. A daily counter adds a hard ceiling that resets
//! at the configured boundary.
//!
//! [`RateLimiter::try_acquire`] never blocks and never sleeps. A denied
//! caller skips the provider.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU32;

use chrono::{DateTime, Duration, Utc};
use governor::clock::FakeRelativeClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use imagefetch_common::ProviderKind;
use parking_lot::Mutex;
use tracing::debug;

use crate::clock::period_start;

const WINDOW_SECS: i64 = 60;

type ProviderGcra = governor::RateLimiter<
    NotKeyed,
    InMemoryState,
    FakeRelativeClock,
    governor::middleware::NoOpMiddleware<governor::nanos::Nanos>,
>;

fn window() -> Duration {
    Duration::seconds(WINDOW_SECS)
}

/// Admission limits for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub per_minute: u32,
    pub per_day: u32,
}

/// Current admission state of one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateStats {
    pub last_minute: usize,
    pub today: u32,
    pub limit: RateLimit,
}

struct Bucket {
    limit: RateLimit,
    /// `None` when the per-minute limit is zero: nothing is ever admitted.
    gcra: Option<ProviderGcra>,
    clock: FakeRelativeClock,
    /// Latest caller timestamp the clock has been advanced to.
    seen: DateTime<Utc>,
    admitted: VecDeque<DateTime<Utc>>,
    today: u32,
    period: DateTime<Utc>,
}

impl Bucket {
    fn new(limit: RateLimit, now: DateTime<Utc>, period: DateTime<Utc>) -> Self {
        let clock = FakeRelativeClock::default();
        let gcra = NonZeroU32::new(limit.per_minute)
            .map(|n| governor::RateLimiter::direct_with_clock(Quota::per_minute(n), &clock));
        Self {
            limit,
            gcra,
            clock,
            seen: now,
            admitted: VecDeque::new(),
            today: 0,
            period,
        }
    }

    /// Move the limiter clock forward to `now`. Earlier timestamps are
    /// ignored so a clock stepping backwards never replenishes cells.
    fn sync_clock(&mut self, now: DateTime<Utc>) {
        if now <= self.seen {
            return;
        }
        if let Ok(elapsed) = (now - self.seen).to_std() {
            self.clock.advance(elapsed);
            self.seen = now;
        }
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - window();
        while let Some(front) = self.admitted.front() {
            if *front <= cutoff {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    fn try_take(&mut self, now: DateTime<Utc>, period: DateTime<Utc>) -> bool {
        if period > self.period {
            self.period = period;
            self.today = 0;
        }
        if self.today >= self.limit.per_day {
            return false;
        }

        self.sync_clock(now);
        self.evict(now);

        // The log is checked first so a denial never spends a GCRA cell.
        if self.admitted.len() >= self.limit.per_minute as usize {
            return false;
        }
        let Some(gcra) = &self.gcra else {
            return false;
        };
        if gcra.check().is_err() {
            return false;
        }

        self.admitted.push_back(now);
        self.today += 1;
        true
    }
}

pub struct RateLimiter {
    buckets: Mutex<HashMap<ProviderKind, Bucket>>,
    reset_hour: u32,
}

impl RateLimiter {
    pub fn new(reset_hour: u32) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            reset_hour,
        }
    }

    /// Install or replace the limits for a provider. The bucket starts full.
    pub fn register(&self, provider: ProviderKind, limit: RateLimit, now: DateTime<Utc>) {
        let period = period_start(now, self.reset_hour);
        self.buckets
            .lock()
            .insert(provider, Bucket::new(limit, now, period));
    }

    /// Take one admission for `provider` if every budget allows it.
    ///
    /// Unregistered providers are always denied.
    pub fn try_acquire(&self, provider: ProviderKind, now: DateTime<Utc>) -> bool {
        let period = period_start(now, self.reset_hour);
        let mut buckets = self.buckets.lock();
        let Some(bucket) = buckets.get_mut(&provider) else {
            return false;
        };

        let admitted = bucket.try_take(now, period);
        if !admitted {
            debug!(
                provider = %provider,
                last_minute = bucket.admitted.len(),
                today = bucket.today,
                "Rate limit denied request"
            );
        }
        admitted
    }

    pub fn stats(&self, provider: ProviderKind) -> Option<RateStats> {
        self.buckets.lock().get(&provider).map(|b| RateStats {
            last_minute: b.admitted.len(),
            today: b.today,
            limit: b.limit,
        })
    }
}
