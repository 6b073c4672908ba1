//! Telemetry for limiter decisions.
//!
//! Every check emits one [`LimiterEvent`]. Events flow through
//! `TelemetrySink` implementations, which are `tower::Service<LimiterEvent>`
//! so they compose with the rest of a tower stack. Emission is best-effort:
//! a failing sink never fails the check.

pub mod events;
pub mod sinks;

pub use events::{event_to_json, LimiterEvent};
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, TelemetrySink};
