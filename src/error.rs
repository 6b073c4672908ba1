//! Error types for the limiter and the tower middleware
use std::fmt;
use std::time::Duration;

/// Boxed error produced by a backing store.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures of a single rate limit check. None of them touch stored state.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum RateLimitError {
    /// A parameter was missing, unparsable, or out of range.
    #[error("invalid {param} (got {value:?})")]
    InvalidArgument {
        /// Name of the offending parameter (`burst`, `count_per_period`, `period`, `quantity`, `arity`).
        param: &'static str,
        /// Raw input as supplied by the caller.
        value: String,
    },
    /// The key exists but holds a value this limiter never writes.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value (key {key:?} holds a {found})")]
    WrongKeyType {
        /// Key that was checked.
        key: String,
        /// Shape found at the key.
        found: &'static str,
    },
    /// The key holds a string that does not parse as a stored timestamp.
    #[error("invalid stored rater at key {key:?}: {raw:?}")]
    CorruptState {
        /// Key that was checked.
        key: String,
        /// Raw stored value.
        raw: String,
    },
    /// The backing store failed.
    #[error("store: {0}")]
    Store(#[source] BoxError),
}

impl RateLimitError {
    pub(crate) fn invalid(param: &'static str, value: impl ToString) -> Self {
        RateLimitError::InvalidArgument { param, value: value.to_string() }
    }

    /// Wrap a store error.
    pub fn store<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        RateLimitError::Store(Box::new(err))
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }

    pub fn is_wrong_key_type(&self) -> bool {
        matches!(self, Self::WrongKeyType { .. })
    }

    pub fn is_corrupt_state(&self) -> bool {
        matches!(self, Self::CorruptState { .. })
    }

    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Name of the rejected parameter, if this is an argument error.
    pub fn invalid_param(&self) -> Option<&'static str> {
        match self {
            Self::InvalidArgument { param, .. } => Some(param),
            _ => None,
        }
    }
}

/// Error returned by [`RateLimitService`](crate::middleware::RateLimitService).
#[derive(Debug)]
pub enum ThrottleError<E> {
    /// The request was blocked by the limiter.
    RateLimited {
        /// When a retry could succeed; `None` if the request can never fit.
        retry_after: Option<Duration>,
        /// When the key's capacity is fully restored.
        reset_after: Duration,
    },
    /// The limiter itself failed (bad parameters, corrupt state, store down).
    Limiter(RateLimitError),
    /// The underlying service failed
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for ThrottleError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited { retry_after: Some(wait), reset_after } => {
                write!(f, "rate limited; retry after {:?} (reset after {:?})", wait, reset_after)
            }
            Self::RateLimited { retry_after: None, reset_after } => {
                write!(f, "rate limited; request exceeds capacity (reset after {:?})", reset_after)
            }
            Self::Limiter(e) => write!(f, "rate limiter failed: {}", e),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ThrottleError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Limiter(e) => Some(e),
            Self::RateLimited { .. } => None,
        }
    }
}

impl<E> ThrottleError<E> {
    /// Check if this error is a limiter rejection
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
    /// Retry hint for rejections that can eventually succeed.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
    /// Borrow the limiter failure if present.
    pub fn as_limiter(&self) -> Option<&RateLimitError> {
        match self {
            Self::Limiter(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<RateLimitError> for ThrottleError<E> {
    fn from(e: RateLimitError) -> Self {
        Self::Limiter(e)
    }
}
