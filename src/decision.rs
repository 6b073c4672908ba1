//! The observable result of a rate limit check.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gcra::Outcome;

/// Result of [`GcraLimiter::check`](crate::GcraLimiter::check).
///
/// All values are derived from the single stored timestamp; none of them is
/// persisted on its own. Durations are whole seconds, truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    /// Whether the request was blocked.
    pub limited: bool,
    /// `burst + 1`.
    pub limit: i64,
    /// Unit-cost requests that could still be admitted right now (`0..=limit`).
    pub remaining: i64,
    /// Seconds until a retry could succeed; `-1` when allowed or never retryable.
    ///
    /// A blocked decision may report `0` when the wait is under a second; the
    /// request is still blocked until that fraction has passed.
    pub retry_after: i64,
    /// Seconds until the key's capacity is fully restored. Also truncated, so
    /// waiting exactly this long may fall short by up to a second.
    pub reset_after: i64,
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        !self.limited
    }

    /// `Some` only for blocked requests that could succeed later.
    /// Useful for `Retry-After` headers.
    pub fn retry_after_duration(&self) -> Option<Duration> {
        u64::try_from(self.retry_after).ok().map(Duration::from_secs)
    }

    pub fn reset_after_duration(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.reset_after).unwrap_or(0))
    }

    /// The five-integer reply: limited, limit, remaining, retry after, reset after.
    pub fn to_reply(&self) -> [i64; 5] {
        [i64::from(self.limited), self.limit, self.remaining, self.retry_after, self.reset_after]
    }
}

impl From<Outcome> for RateLimitDecision {
    fn from(out: Outcome) -> Self {
        Self {
            limited: out.limited,
            limit: out.limit,
            remaining: out.remaining,
            retry_after: out.retry_after,
            reset_after: out.reset_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_order_is_fixed() {
        let d = RateLimitDecision {
            limited: true,
            limit: 16,
            remaining: 0,
            retry_after: 2,
            reset_after: 32,
        };
        assert_eq!(d.to_reply(), [1, 16, 0, 2, 32]);
        assert!(!d.is_allowed());
        assert_eq!(d.retry_after_duration(), Some(Duration::from_secs(2)));
        assert_eq!(d.reset_after_duration(), Duration::from_secs(32));
    }

    #[test]
    fn sentinel_retry_has_no_duration() {
        let d = RateLimitDecision {
            limited: false,
            limit: 1,
            remaining: 0,
            retry_after: -1,
            reset_after: 1,
        };
        assert_eq!(d.retry_after_duration(), None);
        assert_eq!(d.to_reply()[0], 0);
    }

    #[test]
    fn serializes_with_field_names() {
        let d = RateLimitDecision {
            limited: false,
            limit: 16,
            remaining: 15,
            retry_after: -1,
            reset_after: 2,
        };
        let json = serde_json::to_value(d).unwrap();
        assert_eq!(json["remaining"], 15);
        assert_eq!(json["retry_after"], -1);
        let back: RateLimitDecision = serde_json::from_value(json).unwrap();
        assert_eq!(back, d);
    }
}
