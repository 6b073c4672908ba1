//! The Generic Cell Rate Algorithm.
//!
//! [`Gcra::decide`] is a pure function of the stored theoretical arrival time
//! (TAT), the rate parameters, the request cost and `now`. It performs no I/O
//! and keeps no state, so any number of callers may share one [`Gcra`]; the
//! caller owns the read-decide-write cycle around it.
//!
//! All arithmetic is integer and truncating, in ticks of the configured
//! [`TimeUnit`]. Additions and multiplications saturate instead of wrapping.

use crate::clock::TimeUnit;
use crate::error::RateLimitError;

/// Stored TAT value meaning "no prior state".
pub const NO_STATE: i64 = 0;

/// Validated rate limit parameters, supplied per call and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateParams {
    burst: i64,
    count_per_period: i64,
    period_seconds: i64,
}

impl RateParams {
    /// Validate and build parameters.
    ///
    /// # Errors
    /// [`RateLimitError::InvalidArgument`] if `burst < 0`, `count_per_period <= 0`
    /// or `period_seconds <= 0`.
    ///
    /// # Examples
    /// ```
    /// use cellrate::RateParams;
    /// let params = RateParams::new(15, 30, 60).unwrap();
    /// assert_eq!(params.limit(), 16);
    /// assert!(RateParams::new(-1, 30, 60).is_err());
    /// ```
    pub fn new(
        burst: i64,
        count_per_period: i64,
        period_seconds: i64,
    ) -> Result<Self, RateLimitError> {
        if burst < 0 {
            return Err(RateLimitError::invalid("burst", burst));
        }
        if count_per_period <= 0 {
            return Err(RateLimitError::invalid("count_per_period", count_per_period));
        }
        if period_seconds <= 0 {
            return Err(RateLimitError::invalid("period", period_seconds));
        }
        Ok(Self { burst, count_per_period, period_seconds })
    }

    pub fn burst(&self) -> i64 {
        self.burst
    }

    pub fn count_per_period(&self) -> i64 {
        self.count_per_period
    }

    pub fn period_seconds(&self) -> i64 {
        self.period_seconds
    }

    /// Maximum number of unit-cost requests admitted at once: `burst + 1`.
    pub fn limit(&self) -> i64 {
        self.burst.saturating_add(1)
    }

    /// Ticks between admitted units at the steady rate, truncated.
    ///
    /// Rates finer than one tick are clamped to one tick.
    pub fn emission_interval(&self, unit: TimeUnit) -> i64 {
        (self.period_seconds.saturating_mul(unit.units_per_second()) / self.count_per_period).max(1)
    }

    /// How far ahead of schedule the bucket may run: `emission_interval * (burst + 1)`.
    pub fn delay_variation_tolerance(&self, unit: TimeUnit) -> i64 {
        self.emission_interval(unit).saturating_mul(self.limit())
    }
}

/// Everything one decision produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// TAT to persist; `None` when the request was blocked.
    pub new_tat: Option<i64>,
    pub limited: bool,
    /// Always `burst + 1`.
    pub limit: i64,
    /// Unit-cost requests that could still be admitted right now.
    pub remaining: i64,
    /// Whole seconds until a retry could succeed, or `-1`. Truncated, so a
    /// blocked outcome with less than a second to wait reports `0`.
    pub retry_after: i64,
    /// Whole seconds until the key's capacity is fully restored, truncated.
    /// Use `ttl` when sub-second precision matters.
    pub reset_after: i64,
    /// Exact reset horizon in ticks, never negative. Used as the stored value's expiration.
    pub ttl: i64,
}

/// The decision engine, bound to one tick size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Gcra {
    unit: TimeUnit,
}

impl Gcra {
    pub fn new(unit: TimeUnit) -> Self {
        Self { unit }
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Decide whether `quantity` units may proceed at `now`.
    ///
    /// `tat` is the stored theoretical arrival time, or [`NO_STATE`] for a key
    /// never seen before, which behaves as `tat == now`. `quantity` of zero
    /// inspects without consuming; the outcome then carries the unchanged
    /// effective TAT, which the caller must not persist.
    ///
    /// # Examples
    /// ```
    /// use cellrate::{Gcra, RateParams, TimeUnit};
    /// let gcra = Gcra::new(TimeUnit::Micros);
    /// let params = RateParams::new(15, 30, 60).unwrap();
    /// let now = 1_700_000_000_000_000;
    /// let out = gcra.decide(0, &params, 1, now);
    /// assert!(!out.limited);
    /// assert_eq!((out.limit, out.remaining, out.retry_after), (16, 15, -1));
    /// assert_eq!(out.new_tat, Some(now + 2_000_000));
    /// ```
    pub fn decide(&self, tat: i64, params: &RateParams, quantity: i64, now: i64) -> Outcome {
        let ups = self.unit.units_per_second();
        let emission_interval = params.emission_interval(self.unit);
        let tolerance = params.delay_variation_tolerance(self.unit);
        let limit = params.limit();

        let tat = if tat == NO_STATE { now } else { tat };
        let increment = emission_interval.saturating_mul(quantity.max(0));
        let new_tat = now.max(tat).saturating_add(increment);

        let allow_at = new_tat.saturating_sub(tolerance);
        let diff = now.saturating_sub(allow_at);

        let (persist, limited, retry_after, ttl) = if diff < 0 {
            // Measured against the old TAT; the rejected one is discarded.
            let retry_after = if increment <= tolerance { -diff / ups } else { -1 };
            (None, true, retry_after, tat.saturating_sub(now))
        } else {
            (Some(new_tat), false, -1, new_tat.saturating_sub(now))
        };

        let next = tolerance.saturating_sub(ttl);
        let remaining =
            if next > -emission_interval { (next / emission_interval).min(limit) } else { 0 };

        let ttl = ttl.max(0);
        Outcome {
            new_tat: persist,
            limited,
            limit,
            remaining,
            retry_after,
            reset_after: ttl / ups,
            ttl,
        }
    }
}
