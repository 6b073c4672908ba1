#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # cellrate
//!
//! Rate limiting with the Generic Cell Rate Algorithm (GCRA): one persisted
//! timestamp per key, no background leak process, no counters.
//!
//! ## Layers
//!
//! - [`Gcra`]: the pure decision engine. Given the stored theoretical arrival
//!   time, the rate parameters, a cost and `now`, it derives whether the
//!   request is allowed, how much capacity remains, when to retry and when the
//!   key fully resets.
//! - [`GcraLimiter`]: the only component that touches storage. It performs the
//!   read-decide-write cycle inside the per-key critical section provided by a
//!   [`KeyStore`].
//! - [`command`] and [`middleware`]: a textual command surface and a tower
//!   layer on top of the limiter.
//!
//! ## Quick Start
//!
//! ```rust
//! use cellrate::{GcraLimiter, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = GcraLimiter::new(MemoryStore::new());
//!
//!     // Burst of 16, then 30 per minute.
//!     let decision = limiter.check("api:alice", 15, 30, 60, 1).await.unwrap();
//!     if decision.limited {
//!         println!("retry in {:?}", decision.retry_after_duration());
//!     } else {
//!         println!("{} of {} left", decision.remaining, decision.limit);
//!     }
//! }
//! ```

pub mod clock;
pub mod command;
pub mod config;
pub mod decision;
pub mod error;
pub mod gcra;
pub mod limiter;
pub mod middleware;
pub mod store;
pub mod telemetry;

// Re-exports
pub use clock::{Clock, ClockSource, ManualClock, MonotonicClock, TimeUnit, WallClock};
pub use command::LimitCommand;
pub use config::{ConfigError, LimiterConfig};
pub use decision::RateLimitDecision;
pub use error::{RateLimitError, ThrottleError};
pub use gcra::{Gcra, Outcome, RateParams};
pub use limiter::GcraLimiter;
pub use middleware::{RateLimitLayer, RateLimitService};
pub use store::{KeyHandle, KeyStore, MemoryStore, Value};
