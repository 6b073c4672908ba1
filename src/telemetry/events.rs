use std::fmt;

use serde_json::json;

/// Events emitted by the limiter, one per completed or rejected check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimiterEvent {
    /// A request consumed capacity and its new TAT was stored.
    Allowed {
        /// Key that was checked
        key: String,
        /// Units consumed
        quantity: i64,
        /// Unit-cost requests still admissible
        remaining: i64,
    },
    /// A request was blocked; stored state is untouched.
    Blocked {
        /// Key that was checked
        key: String,
        /// Units requested
        quantity: i64,
        /// Seconds until a retry could succeed, or -1
        retry_after: i64,
    },
    /// A zero-quantity inspection.
    Peeked {
        /// Key that was inspected
        key: String,
        /// Unit-cost requests still admissible
        remaining: i64,
    },
    /// The check failed before a decision (wrong type, corrupt state, store error).
    Rejected {
        /// Key that was checked
        key: String,
        /// Rendered error
        reason: String,
    },
}

impl LimiterEvent {
    pub fn key(&self) -> &str {
        match self {
            LimiterEvent::Allowed { key, .. }
            | LimiterEvent::Blocked { key, .. }
            | LimiterEvent::Peeked { key, .. }
            | LimiterEvent::Rejected { key, .. } => key,
        }
    }
}

impl fmt::Display for LimiterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterEvent::Allowed { key, quantity, remaining } => {
                write!(f, "Allowed(key={}, quantity={}, remaining={})", key, quantity, remaining)
            }
            LimiterEvent::Blocked { key, quantity, retry_after } => {
                write!(f, "Blocked(key={}, quantity={}, retry_after={})", key, quantity, retry_after)
            }
            LimiterEvent::Peeked { key, remaining } => {
                write!(f, "Peeked(key={}, remaining={})", key, remaining)
            }
            LimiterEvent::Rejected { key, reason } => {
                write!(f, "Rejected(key={}, reason={})", key, reason)
            }
        }
    }
}

/// Convert a LimiterEvent into a JSON value for sinks.
pub fn event_to_json(event: &LimiterEvent) -> serde_json::Value {
    match event {
        LimiterEvent::Allowed { key, quantity, remaining } => json!({
            "kind": "allowed",
            "key": key,
            "quantity": *quantity,
            "remaining": *remaining,
        }),
        LimiterEvent::Blocked { key, quantity, retry_after } => json!({
            "kind": "blocked",
            "key": key,
            "quantity": *quantity,
            "retry_after": *retry_after,
        }),
        LimiterEvent::Peeked { key, remaining } => json!({
            "kind": "peeked",
            "key": key,
            "remaining": *remaining,
        }),
        LimiterEvent::Rejected { key, reason } => json!({
            "kind": "rejected",
            "key": key,
            "reason": reason,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_compact() {
        let e = LimiterEvent::Blocked { key: "ip:1".into(), quantity: 1, retry_after: 2 };
        assert_eq!(e.to_string(), "Blocked(key=ip:1, quantity=1, retry_after=2)");
        assert_eq!(e.key(), "ip:1");
    }

    #[test]
    fn json_carries_kind() {
        let v = event_to_json(&LimiterEvent::Allowed { key: "u".into(), quantity: 3, remaining: 7 });
        assert_eq!(v["kind"], "allowed");
        assert_eq!(v["remaining"], 7);
        let v = event_to_json(&LimiterEvent::Rejected { key: "u".into(), reason: "bad".into() });
        assert_eq!(v["kind"], "rejected");
        assert_eq!(v["reason"], "bad");
    }
}
