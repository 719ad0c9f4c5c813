//! Telemetry for admission decisions.
//!
//! Limiters describe what they did as [`AdmissionEvent`]s and hand them to a
//! [`TelemetrySink`]. This is the channel shared-store failures are reported
//! on: the caller only ever sees a boolean decision.
//!
//! # Event Types
//!
//! - `Allowed` / `Denied`: one per decision made by the shared-store engine
//! - `StoreFailure`: the store could not complete an evaluation; carries the
//!   error text and the decision the engine fell back to
//!
//! # Telemetry Sinks
//!
//! The `TelemetrySink` trait is a `tower::Service<AdmissionEvent>` so sinks can
//! be composed with ordinary tower combinators.

pub mod events;
pub mod sinks;

pub use events::AdmissionEvent;
#[cfg(feature = "telemetry-json")]
pub use events::event_to_json;
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, TelemetrySink};
