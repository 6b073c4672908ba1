//! Clock abstractions and time units used to sample `now` for the rate decision.
//!
//! Every timestamp a limiter persists is expressed in ticks of one [`TimeUnit`]
//! read from one [`Clock`]. Both are chosen once, when the limiter is built;
//! mixing clocks or units for the same key history corrupts the stored state.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Clock abstraction so timing can be faked in tests.
///
/// Returns the elapsed time since a fixed origin (the UNIX epoch for the built-in clocks).
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Duration;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

/// Wall clock backed by `SystemTime::now()`.
///
/// Survives restarts and failover to another host, but follows every adjustment
/// made to the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> Duration {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
    }
}

/// Monotonic clock backed by `Instant::now()`.
///
/// Notes: anchored at the wall time observed on construction, then advanced by
/// `Instant::elapsed`, so it never runs backwards inside a process. A restart
/// re-anchors it; state written by another process may be ahead or behind.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    anchor: Duration,
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self { anchor: WallClock.now(), start: Instant::now() }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.anchor.saturating_add(self.start.elapsed())
    }
}

/// Manually driven clock for tests and simulations. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    /// Start the clock at `start` past the origin.
    pub fn new(start: Duration) -> Self {
        let clock = Self::default();
        clock.set(start);
        clock
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        let _ = self.nanos.fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
            Some(cur.saturating_add(by))
        });
    }

    /// Jump to an absolute time. Going backwards is allowed; the limiter tolerates it.
    pub fn set(&self, to: Duration) {
        let to = u64::try_from(to.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.store(to, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }
}

/// Process-wide choice of time source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockSource {
    /// [`WallClock`]: continuity across failover, exposed to clock changes.
    #[default]
    Wall,
    /// [`MonotonicClock`]: immune to clock changes, re-anchored on restart.
    Monotonic,
}

impl ClockSource {
    /// Instantiate the clock this source names.
    pub fn build(self) -> Arc<dyn Clock> {
        match self {
            ClockSource::Wall => Arc::new(WallClock),
            ClockSource::Monotonic => Arc::new(MonotonicClock::default()),
        }
    }
}

impl FromStr for ClockSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wall" | "wallclock" | "realtime" => Ok(ClockSource::Wall),
            "monotonic" | "mono" => Ok(ClockSource::Monotonic),
            other => Err(format!("unknown clock source: {other}")),
        }
    }
}

impl std::fmt::Display for ClockSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClockSource::Wall => f.write_str("wall"),
            ClockSource::Monotonic => f.write_str("monotonic"),
        }
    }
}

/// Tick size for persisted timestamps and all derived quantities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Seconds,
    Millis,
    #[default]
    Micros,
    Nanos,
}

impl TimeUnit {
    pub const fn units_per_second(self) -> i64 {
        match self {
            TimeUnit::Seconds => 1,
            TimeUnit::Millis => 1_000,
            TimeUnit::Micros => 1_000_000,
            TimeUnit::Nanos => 1_000_000_000,
        }
    }

    /// Whole ticks in `d`, truncated; saturates at `i64::MAX`.
    pub fn ticks(self, d: Duration) -> i64 {
        let ticks = match self {
            TimeUnit::Seconds => u128::from(d.as_secs()),
            TimeUnit::Millis => d.as_millis(),
            TimeUnit::Micros => d.as_micros(),
            TimeUnit::Nanos => d.as_nanos(),
        };
        i64::try_from(ticks).unwrap_or(i64::MAX)
    }

    /// Duration spanned by `ticks`; non-positive values map to zero.
    pub fn duration(self, ticks: i64) -> Duration {
        let ticks = u64::try_from(ticks).unwrap_or(0);
        match self {
            TimeUnit::Seconds => Duration::from_secs(ticks),
            TimeUnit::Millis => Duration::from_millis(ticks),
            TimeUnit::Micros => Duration::from_micros(ticks),
            TimeUnit::Nanos => Duration::from_nanos(ticks),
        }
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s" | "sec" | "secs" | "seconds" => Ok(TimeUnit::Seconds),
            "ms" | "millis" | "milliseconds" => Ok(TimeUnit::Millis),
            "us" | "micros" | "microseconds" => Ok(TimeUnit::Micros),
            "ns" | "nanos" | "nanoseconds" => Ok(TimeUnit::Nanos),
            other => Err(format!("unknown time unit: {other}")),
        }
    }
}

impl std::fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TimeUnit::Seconds => "s",
            TimeUnit::Millis => "ms",
            TimeUnit::Micros => "us",
            TimeUnit::Nanos => "ns",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_and_shares_time() {
        let clock = ManualClock::new(Duration::from_secs(10));
        let other = clock.clone();
        clock.advance(Duration::from_millis(1500));
        assert_eq!(other.now(), Duration::from_millis(11_500));
        other.set(Duration::from_secs(3));
        assert_eq!(clock.now(), Duration::from_secs(3));
    }

    #[test]
    fn monotonic_clock_never_runs_backwards() {
        let clock = MonotonicClock::default();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(a > Duration::ZERO);
    }

    #[test]
    fn ticks_truncate_per_unit() {
        let d = Duration::new(2, 987_654_321);
        assert_eq!(TimeUnit::Seconds.ticks(d), 2);
        assert_eq!(TimeUnit::Millis.ticks(d), 2_987);
        assert_eq!(TimeUnit::Micros.ticks(d), 2_987_654);
        assert_eq!(TimeUnit::Nanos.ticks(d), 2_987_654_321);
        assert_eq!(TimeUnit::Nanos.ticks(Duration::MAX), i64::MAX);
    }

    #[test]
    fn negative_ticks_clamp_to_zero() {
        assert_eq!(TimeUnit::Micros.duration(-5), Duration::ZERO);
        assert_eq!(TimeUnit::Millis.duration(1_250), Duration::from_millis(1_250));
    }

    #[test]
    fn parses_sources_and_units() {
        assert_eq!("Monotonic".parse::<ClockSource>().unwrap(), ClockSource::Monotonic);
        assert_eq!(" wall ".parse::<ClockSource>().unwrap(), ClockSource::Wall);
        assert!("lunar".parse::<ClockSource>().is_err());
        assert_eq!("us".parse::<TimeUnit>().unwrap(), TimeUnit::Micros);
        assert_eq!("seconds".parse::<TimeUnit>().unwrap(), TimeUnit::Seconds);
        assert!("fortnight".parse::<TimeUnit>().is_err());
        assert_eq!(TimeUnit::Nanos.to_string().parse::<TimeUnit>().unwrap(), TimeUnit::Nanos);
    }
}
