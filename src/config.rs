//! Process-wide limiter configuration.
//!
//! The clock source and tick size are decided once, before the first check,
//! and never change for the lifetime of a limiter. Stored timestamps written
//! under one configuration are meaningless under another.

use serde::{Deserialize, Serialize};

use crate::clock::{ClockSource, TimeUnit};

/// Environment variable selecting the clock source (`wall` or `monotonic`).
pub const CLOCK_ENV: &str = "CELLRATE_CLOCK";
/// Environment variable selecting the tick size (`s`, `ms`, `us`, `ns`).
pub const TIME_UNIT_ENV: &str = "CELLRATE_TIME_UNIT";

/// Errors produced when loading configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable held an unrecognized value.
    #[error("{var}: {msg}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Parse failure.
        msg: String,
    },
}

/// Clock source and tick size shared by every check of one limiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Where `now` comes from.
    pub clock: ClockSource,
    /// Resolution of stored timestamps.
    pub unit: TimeUnit,
}

impl LimiterConfig {
    pub fn new(clock: ClockSource, unit: TimeUnit) -> Self {
        Self { clock, unit }
    }

    /// Read [`CLOCK_ENV`] and [`TIME_UNIT_ENV`], falling back to defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(raw) = lookup(CLOCK_ENV) {
            cfg.clock =
                raw.parse().map_err(|msg| ConfigError::InvalidEnv { var: CLOCK_ENV, msg })?;
        }
        if let Some(raw) = lookup(TIME_UNIT_ENV) {
            cfg.unit =
                raw.parse().map_err(|msg| ConfigError::InvalidEnv { var: TIME_UNIT_ENV, msg })?;
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_wall_clock_microseconds() {
        let cfg = LimiterConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg, LimiterConfig::new(ClockSource::Wall, TimeUnit::Micros));
    }

    #[test]
    fn lookup_overrides_each_field() {
        let env: HashMap<&str, &str> =
            [(CLOCK_ENV, "monotonic"), (TIME_UNIT_ENV, "ms")].into_iter().collect();
        let cfg = LimiterConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.clock, ClockSource::Monotonic);
        assert_eq!(cfg.unit, TimeUnit::Millis);
    }

    #[test]
    fn bad_value_names_the_variable() {
        let err = LimiterConfig::from_lookup(|k| (k == TIME_UNIT_ENV).then(|| "hours".to_string()))
            .unwrap_err();
        assert!(err.to_string().starts_with(TIME_UNIT_ENV));
    }

    #[test]
    fn deserializes_partial_json() {
        let cfg: LimiterConfig = serde_json::from_str(r#"{"clock":"monotonic"}"#).unwrap();
        assert_eq!(cfg.clock, ClockSource::Monotonic);
        assert_eq!(cfg.unit, TimeUnit::Micros);
    }
}
