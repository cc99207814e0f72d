//! Dual-bandwidth token bucket.
//!
//! Each [`RateBucket`] carries two independent limits:
//!
//! - **sustained**: `requests_per_minute` tokens, refilled *greedily* (a
//!   fraction of a token accrues continuously, one whole token every
//!   `60s / capacity`)
//! - **burst**: `burst_capacity` tokens, refilled *intervally* (the full
//!   amount lands at once at every 1s boundary counted from bucket creation)
//!
//! A request is admitted only when both limits hold at least one token, and
//! admission takes one token from each. A denial takes nothing.
//!
//! Time is read through governor's [`Reference`] instants, so production uses
//! the quanta-backed `DefaultClock` while tests drive a `FakeRelativeClock`.
//! All arithmetic is integer nanoseconds; nothing here sleeps.

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::Reference;

/// How a bandwidth regains tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refill {
    /// Tokens trickle in continuously across the period.
    Greedy,
    /// The whole capacity is restored at each period boundary.
    Intervally,
}

/// A single capacity/period limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bandwidth {
    capacity: u64,
    period_nanos: u128,
    refill: Refill,
}

impl Bandwidth {
    /// `capacity` tokens spread continuously over `period`.
    pub fn greedy(capacity: NonZeroU32, period: Duration) -> Self {
        Self::new(capacity, period, Refill::Greedy)
    }

    /// `capacity` tokens restored at once every `period`.
    pub fn intervally(capacity: NonZeroU32, period: Duration) -> Self {
        Self::new(capacity, period, Refill::Intervally)
    }

    fn new(capacity: NonZeroU32, period: Duration, refill: Refill) -> Self {
        Self {
            capacity: u64::from(capacity.get()),
            // zero-length periods would divide by zero below
            period_nanos: period.as_nanos().max(1),
            refill,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn refill(&self) -> Refill {
        self.refill
    }
}

/// The pair of limits applied to every client key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketLimits {
    pub sustained: Bandwidth,
    pub burst: Bandwidth,
}

impl BucketLimits {
    /// Standard limits: `per_minute` greedy over 60s, `burst` intervally every 1s.
    pub fn new(per_minute: NonZeroU32, burst: NonZeroU32) -> Self {
        Self {
            sustained: Bandwidth::greedy(per_minute, Duration::from_secs(60)),
            burst: Bandwidth::intervally(burst, Duration::from_secs(1)),
        }
    }
}

/// Which limit refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhausted {
    Sustained,
    Burst,
    Both,
}

impl Exhausted {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exhausted::Sustained => "sustained",
            Exhausted::Burst => "burst",
            Exhausted::Both => "sustained+burst",
        }
    }
}

impl fmt::Display for Exhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable token count for one bandwidth.
#[derive(Debug, Clone, Copy)]
struct Tokens {
    available: u64,
    /// Nanoseconds since bucket creation already converted into tokens.
    refilled_through: u128,
}

impl Tokens {
    fn full(limit: &Bandwidth) -> Self {
        Self {
            available: limit.capacity,
            refilled_through: 0,
        }
    }

    fn refill(&mut self, limit: &Bandwidth, elapsed: u128) {
        let since = elapsed.saturating_sub(self.refilled_through);
        let cap = u128::from(limit.capacity);

        match limit.refill {
            Refill::Greedy => {
                if self.available >= limit.capacity {
                    // a full bucket does not bank time for later
                    self.refilled_through = elapsed;
                    return;
                }
                let gained = since.saturating_mul(cap) / limit.period_nanos;
                if gained == 0 {
                    return;
                }
                self.available = add_capped(self.available, gained, limit.capacity);
                if self.available >= limit.capacity {
                    self.refilled_through = elapsed;
                } else {
                    self.refilled_through += gained * limit.period_nanos / cap;
                }
            }
            Refill::Intervally => {
                let periods = since / limit.period_nanos;
                if periods == 0 {
                    return;
                }
                self.available = add_capped(self.available, periods.saturating_mul(cap), limit.capacity);
                self.refilled_through += periods * limit.period_nanos;
            }
        }
    }
}

fn add_capped(current: u64, gained: u128, capacity: u64) -> u64 {
    let total = u128::from(current).saturating_add(gained);
    u64::try_from(total.min(u128::from(capacity))).unwrap_or(capacity)
}

/// Per-client dual token bucket.
///
/// Not synchronized on its own; the registry serializes access per key.
#[derive(Debug, Clone)]
pub struct RateBucket<I> {
    origin: I,
    limits: BucketLimits,
    sustained: Tokens,
    burst: Tokens,
}

impl<I: Reference> RateBucket<I> {
    /// Create a full bucket whose refill schedule starts at `now`.
    pub fn new(limits: BucketLimits, now: I) -> Self {
        Self {
            origin: now,
            limits,
            sustained: Tokens::full(&limits.sustained),
            burst: Tokens::full(&limits.burst),
        }
    }

    /// Try to take one token from both limits at instant `now`.
    ///
    /// Either both counts drop by one or neither changes.
    pub fn try_consume(&mut self, now: I) -> Result<(), Exhausted> {
        self.refill(now);

        match (self.sustained.available > 0, self.burst.available > 0) {
            (true, true) => {
                self.sustained.available -= 1;
                self.burst.available -= 1;
                Ok(())
            }
            (false, true) => Err(Exhausted::Sustained),
            (true, false) => Err(Exhausted::Burst),
            (false, false) => Err(Exhausted::Both),
        }
    }

    /// Tokens currently available as `(sustained, burst)` at `now`.
    pub fn available(&mut self, now: I) -> (u64, u64) {
        self.refill(now);
        (self.sustained.available, self.burst.available)
    }

    pub fn limits(&self) -> &BucketLimits {
        &self.limits
    }

    fn refill(&mut self, now: I) {
        let elapsed: Duration = now.duration_since(self.origin).into();
        let elapsed = elapsed.as_nanos();
        self.sustained.refill(&self.limits.sustained, elapsed);
        self.burst.refill(&self.limits.burst, elapsed);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use governor::clock::{Clock, FakeRelativeClock};

    fn nz(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    fn bucket(
        per_minute: u32,
        burst: u32,
    ) -> (FakeRelativeClock, RateBucket<<FakeRelativeClock as Clock>::Instant>) {
        let clock = FakeRelativeClock::default();
        let bucket = RateBucket::new(BucketLimits::new(nz(per_minute), nz(burst)), clock.now());
        (clock, bucket)
    }

    #[test]
    fn test_burst_ceiling_within_one_second() {
        let (clock, mut bucket) = bucket(60, 10);

        for i in 0..10 {
            assert!(bucket.try_consume(clock.now()).is_ok(), "request {i} should pass");
        }
        assert_eq!(bucket.try_consume(clock.now()), Err(Exhausted::Burst));
    }

    #[test]
    fn test_burst_refills_in_full_at_interval_boundary() {
        let (clock, mut bucket) = bucket(60, 10);
        for _ in 0..10 {
            bucket.try_consume(clock.now()).unwrap();
        }

        clock.advance(Duration::from_millis(999));
        assert_eq!(bucket.try_consume(clock.now()), Err(Exhausted::Burst));

        // the same second also accrued one sustained token
        clock.advance(Duration::from_millis(1));
        assert_eq!(bucket.available(clock.now()), (51, 10));
    }

    #[test]
    fn test_sustained_exhaustion_with_burst_headroom() {
        let (clock, mut bucket) = bucket(12, 10);

        for _ in 0..10 {
            bucket.try_consume(clock.now()).unwrap();
        }
        clock.advance(Duration::from_secs(1));

        // burst restored, sustained has 2 left and gains one token per 5s
        bucket.try_consume(clock.now()).unwrap();
        bucket.try_consume(clock.now()).unwrap();
        assert_eq!(bucket.try_consume(clock.now()), Err(Exhausted::Sustained));
        assert_eq!(bucket.available(clock.now()), (0, 8));
    }

    #[test]
    fn test_denial_consumes_nothing() {
        let (clock, mut bucket) = bucket(60, 2);
        bucket.try_consume(clock.now()).unwrap();
        bucket.try_consume(clock.now()).unwrap();

        for _ in 0..5 {
            assert!(bucket.try_consume(clock.now()).is_err());
        }
        assert_eq!(bucket.available(clock.now()), (58, 0));
    }

    #[test]
    fn test_greedy_refill_is_continuous() {
        let (clock, mut bucket) = bucket(60, 60);
        for _ in 0..60 {
            bucket.try_consume(clock.now()).unwrap();
        }
        assert_eq!(bucket.try_consume(clock.now()), Err(Exhausted::Both));

        // one sustained token per second
        clock.advance(Duration::from_millis(2500));
        assert_eq!(bucket.available(clock.now()).0, 2);

        // the half second already elapsed is not lost
        clock.advance(Duration::from_millis(500));
        assert_eq!(bucket.available(clock.now()).0, 3);
    }

    #[test]
    fn test_refill_never_exceeds_capacity() {
        let (clock, mut bucket) = bucket(60, 10);
        bucket.try_consume(clock.now()).unwrap();

        clock.advance(Duration::from_secs(3600));
        assert_eq!(bucket.available(clock.now()), (60, 10));
    }

    #[test]
    fn test_full_bucket_does_not_bank_time() {
        let (clock, mut bucket) = bucket(60, 60);

        clock.advance(Duration::from_secs(30));
        for _ in 0..60 {
            bucket.try_consume(clock.now()).unwrap();
        }
        // idle time spent full must not be credited afterwards
        assert_eq!(bucket.available(clock.now()).0, 0);
    }

    #[test]
    fn test_exhausted_display() {
        assert_eq!(Exhausted::Burst.to_string(), "burst");
        assert_eq!(Exhausted::Both.to_string(), "sustained+burst");
    }
}
