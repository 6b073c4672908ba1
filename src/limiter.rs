//! Keyed GCRA limiter over a [`KeyStore`].
//!
//! [`GcraLimiter::check`] is the single point of mutation: it opens the key
//! (entering the store's per-key critical section), reads the stored TAT,
//! samples `now` once, runs [`Gcra::decide`], and writes the new TAT with an
//! expiration only when the request consumed capacity.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::{Clock, TimeUnit};
use crate::config::LimiterConfig;
use crate::decision::RateLimitDecision;
use crate::error::RateLimitError;
use crate::gcra::{Gcra, Outcome, RateParams, NO_STATE};
use crate::store::{KeyHandle, KeyStore, Value};
use crate::telemetry::{emit_best_effort, LimiterEvent, LogSink, NullSink, TelemetrySink};

/// GCRA rate limiter keyed by subject. Clones share the store, clock and sink.
///
/// # Examples
/// ```
/// use cellrate::{GcraLimiter, MemoryStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let limiter = GcraLimiter::new(MemoryStore::new());
/// // 30 requests per minute, bursts of 16.
/// let d = limiter.check("user:42", 15, 30, 60, 1).await.unwrap();
/// assert_eq!(d.to_reply(), [0, 16, 15, -1, 2]);
/// # }
/// ```
#[derive(Debug)]
pub struct GcraLimiter<S, T = NullSink> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    gcra: Gcra,
    config: LimiterConfig,
    sink: T,
}

impl<S, T: Clone> Clone for GcraLimiter<S, T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
            gcra: self.gcra,
            config: self.config,
            sink: self.sink.clone(),
        }
    }
}

impl<S> GcraLimiter<S, NullSink>
where
    S: KeyStore,
{
    /// Limiter with the default configuration (wall clock, microseconds).
    pub fn new(store: S) -> Self {
        Self::with_config(store, LimiterConfig::default())
    }

    /// Limiter using the clock source and tick size in `config`.
    pub fn with_config(store: S, config: LimiterConfig) -> Self {
        Self {
            store: Arc::new(store),
            clock: config.clock.build(),
            gcra: Gcra::new(config.unit),
            config,
            sink: NullSink,
        }
    }
}

impl<S, T> GcraLimiter<S, T>
where
    S: KeyStore,
    T: TelemetrySink,
    T::Future: Send + 'static,
{
    /// Override the clock (useful for deterministic tests).
    ///
    /// Must be called before the first check; switching clocks under existing
    /// state corrupts it.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Emit a [`LimiterEvent`] per check into `sink`.
    pub fn with_sink<U>(self, sink: U) -> GcraLimiter<S, U>
    where
        U: TelemetrySink,
    {
        GcraLimiter {
            store: self.store,
            clock: self.clock,
            gcra: self.gcra,
            config: self.config,
            sink,
        }
    }

    /// Log every [`LimiterEvent`] at `info` under the `cellrate::telemetry` target.
    pub fn with_logging(self) -> GcraLimiter<S, LogSink> {
        self.with_sink(LogSink)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> LimiterConfig {
        self.config
    }

    pub fn unit(&self) -> TimeUnit {
        self.gcra.unit()
    }

    /// Check whether `quantity` units may proceed for `key` right now.
    ///
    /// `burst` must be `>= 0`, `count_per_period` and `period_seconds` `> 0`,
    /// `quantity >= 0`. A zero quantity inspects without consuming.
    ///
    /// # Errors
    /// - [`RateLimitError::InvalidArgument`] before the store is touched.
    /// - [`RateLimitError::WrongKeyType`] if the key holds a non-string value.
    /// - [`RateLimitError::CorruptState`] if the string is not an integer.
    /// - [`RateLimitError::Store`] if the backing store fails.
    pub async fn check(
        &self,
        key: &str,
        burst: i64,
        count_per_period: i64,
        period_seconds: i64,
        quantity: i64,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let params = RateParams::new(burst, count_per_period, period_seconds)?;
        self.check_params(key, &params, quantity).await
    }

    /// Zero-quantity [`check`](Self::check): report without consuming.
    pub async fn peek(
        &self,
        key: &str,
        burst: i64,
        count_per_period: i64,
        period_seconds: i64,
    ) -> Result<RateLimitDecision, RateLimitError> {
        self.check(key, burst, count_per_period, period_seconds, 0).await
    }

    /// [`check`](Self::check) with pre-validated parameters.
    pub async fn check_params(
        &self,
        key: &str,
        params: &RateParams,
        quantity: i64,
    ) -> Result<RateLimitDecision, RateLimitError> {
        if quantity < 0 {
            return Err(RateLimitError::invalid("quantity", quantity));
        }

        match self.decide_and_store(key, params, quantity).await {
            Ok(outcome) => {
                debug!(
                    target: "cellrate::limiter",
                    key,
                    quantity,
                    limited = outcome.limited,
                    remaining = outcome.remaining,
                    retry_after = outcome.retry_after,
                    reset_after = outcome.reset_after,
                    "rate limit decision"
                );
                let event = if quantity == 0 {
                    LimiterEvent::Peeked { key: key.to_string(), remaining: outcome.remaining }
                } else if outcome.limited {
                    LimiterEvent::Blocked {
                        key: key.to_string(),
                        quantity,
                        retry_after: outcome.retry_after,
                    }
                } else {
                    LimiterEvent::Allowed {
                        key: key.to_string(),
                        quantity,
                        remaining: outcome.remaining,
                    }
                };
                emit_best_effort(self.sink.clone(), event).await;
                Ok(outcome.into())
            }
            Err(err) => {
                warn!(target: "cellrate::limiter", key, error = %err, "rate limit check failed");
                emit_best_effort(
                    self.sink.clone(),
                    LimiterEvent::Rejected { key: key.to_string(), reason: err.to_string() },
                )
                .await;
                Err(err)
            }
        }
    }

    async fn decide_and_store(
        &self,
        key: &str,
        params: &RateParams,
        quantity: i64,
    ) -> Result<Outcome, RateLimitError> {
        let mut handle = self.store.open(key).await.map_err(RateLimitError::store)?;

        let tat = match handle.get().await.map_err(RateLimitError::store)? {
            None => NO_STATE,
            Some(Value::Str(raw)) => raw
                .parse::<i64>()
                .map_err(|_| RateLimitError::CorruptState { key: key.to_string(), raw })?,
            Some(other) => {
                return Err(RateLimitError::WrongKeyType {
                    key: key.to_string(),
                    found: other.kind(),
                })
            }
        };

        // Sampled inside the critical section so serialized checks see ordered time.
        let now = self.gcra.unit().ticks(self.clock.now());
        let outcome = self.gcra.decide(tat, params, quantity, now);

        // Peeks leave both the value and its expiration alone.
        if quantity > 0 {
            if let Some(new_tat) = outcome.new_tat {
                handle.set(Value::Str(new_tat.to_string())).await.map_err(RateLimitError::store)?;
                handle
                    .expire(self.gcra.unit().duration(outcome.ttl))
                    .await
                    .map_err(RateLimitError::store)?;
            }
        }
        Ok(outcome)
    }
}
