//! Textual command surface.
//!
//! ```text
//! RATER.LIMIT <key> <burst> <count per period> <period> [<quantity>]
//! ```
//!
//! Replies with five integers: limited (0/1), limit, remaining, retry after
//! (seconds, -1 if not limited or never retryable) and reset after (seconds).

use serde_json::Value as JsonValue;

use crate::error::RateLimitError;
use crate::gcra::RateParams;
use crate::limiter::GcraLimiter;
use crate::store::KeyStore;
use crate::telemetry::TelemetrySink;

/// Command name accepted as the optional first token.
pub const COMMAND_NAME: &str = "RATER.LIMIT";

/// A parsed rate limit command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LimitCommand {
    pub key: String,
    pub params: RateParams,
    /// Defaults to 1; 0 inspects without consuming.
    pub quantity: i64,
}

impl LimitCommand {
    /// Parse `[RATER.LIMIT] <key> <burst> <count per period> <period> [<quantity>]`.
    ///
    /// # Examples
    /// ```
    /// use cellrate::command::LimitCommand;
    /// let cmd = LimitCommand::parse(&["RATER.LIMIT", "user:1", "15", "30", "60"]).unwrap();
    /// assert_eq!(cmd.quantity, 1);
    /// assert_eq!(cmd.params.limit(), 16);
    /// ```
    pub fn parse<A: AsRef<str>>(args: &[A]) -> Result<Self, RateLimitError> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        let args = match args.split_first() {
            Some((first, rest)) if first.eq_ignore_ascii_case(COMMAND_NAME) => rest,
            _ => &args[..],
        };
        if !(4..=5).contains(&args.len()) {
            return Err(RateLimitError::invalid("arity", args.len()));
        }

        let burst = parse_int("burst", args[1])?;
        let count = parse_int("count_per_period", args[2])?;
        let period = parse_int("period", args[3])?;
        let quantity = match args.get(4) {
            Some(raw) => parse_int("quantity", raw)?,
            None => 1,
        };
        Self::build(args[0], burst, count, period, quantity)
    }

    /// Parse from a JSON object:
    /// `{"key": "...", "burst": 15, "count_per_period": 30, "period": 60, "quantity": 1}`.
    ///
    /// Numbers may also be given as decimal strings.
    pub fn from_json(args: &JsonValue) -> Result<Self, RateLimitError> {
        let key = args
            .get("key")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| RateLimitError::invalid("key", args.get("key").unwrap_or(&JsonValue::Null)))?;
        let burst = json_int(args, "burst")?.ok_or_else(|| RateLimitError::invalid("burst", "missing"))?;
        let count = json_int(args, "count_per_period")?
            .ok_or_else(|| RateLimitError::invalid("count_per_period", "missing"))?;
        let period =
            json_int(args, "period")?.ok_or_else(|| RateLimitError::invalid("period", "missing"))?;
        let quantity = json_int(args, "quantity")?.unwrap_or(1);
        Self::build(key, burst, count, period, quantity)
    }

    fn build(
        key: &str,
        burst: i64,
        count: i64,
        period: i64,
        quantity: i64,
    ) -> Result<Self, RateLimitError> {
        let params = RateParams::new(burst, count, period)?;
        if quantity < 0 {
            return Err(RateLimitError::invalid("quantity", quantity));
        }
        Ok(Self { key: key.to_string(), params, quantity })
    }

    /// Run against `limiter`, returning the five-integer reply.
    pub async fn execute<S, T>(&self, limiter: &GcraLimiter<S, T>) -> Result<[i64; 5], RateLimitError>
    where
        S: KeyStore,
        T: TelemetrySink,
        T::Future: Send + 'static,
    {
        let decision = limiter.check_params(&self.key, &self.params, self.quantity).await?;
        Ok(decision.to_reply())
    }
}

fn parse_int(param: &'static str, raw: &str) -> Result<i64, RateLimitError> {
    raw.parse::<i64>().map_err(|_| RateLimitError::invalid(param, raw))
}

fn json_int(args: &JsonValue, param: &'static str) -> Result<Option<i64>, RateLimitError> {
    match args.get(param) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::Number(n)) => {
            n.as_i64().map(Some).ok_or_else(|| RateLimitError::invalid(param, n))
        }
        Some(JsonValue::String(s)) => parse_int(param, s).map(Some),
        Some(other) => Err(RateLimitError::invalid(param, other)),
    }
}
