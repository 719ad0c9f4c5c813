//! Events emitted by limiters.

use std::fmt;

#[cfg(feature = "telemetry-json")]
use serde_json::json;

/// What a limiter did for one identity.
///
/// ```rust
/// use tollgate::telemetry::AdmissionEvent;
///
/// let event = AdmissionEvent::StoreFailure {
///     identity: "alice".into(),
///     error: "connection refused".into(),
///     allowed: true,
/// };
/// assert!(event.is_store_failure());
/// assert_eq!(event.identity(), "alice");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionEvent {
    /// A token was taken.
    Allowed { identity: String },
    /// The bucket held less than one token.
    Denied { identity: String },
    /// The shared store could not complete the evaluation.
    ///
    /// `allowed` is the decision the engine returned anyway (true when failing
    /// open).
    StoreFailure { identity: String, error: String, allowed: bool },
}

impl AdmissionEvent {
    pub fn identity(&self) -> &str {
        match self {
            AdmissionEvent::Allowed { identity }
            | AdmissionEvent::Denied { identity }
            | AdmissionEvent::StoreFailure { identity, .. } => identity,
        }
    }

    /// Decision returned to the caller.
    pub fn allowed(&self) -> bool {
        match self {
            AdmissionEvent::Allowed { .. } => true,
            AdmissionEvent::Denied { .. } => false,
            AdmissionEvent::StoreFailure { allowed, .. } => *allowed,
        }
    }

    pub fn is_store_failure(&self) -> bool {
        matches!(self, AdmissionEvent::StoreFailure { .. })
    }
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionEvent::Allowed { identity } => write!(f, "Allowed({})", identity),
            AdmissionEvent::Denied { identity } => write!(f, "Denied({})", identity),
            AdmissionEvent::StoreFailure { identity, error, allowed } => {
                write!(f, "StoreFailure({}, allowed={}, error={})", identity, allowed, error)
            }
        }
    }
}

/// Convert an AdmissionEvent into a JSON value for sinks.
#[cfg(feature = "telemetry-json")]
pub fn event_to_json(event: &AdmissionEvent) -> serde_json::Value {
    match event {
        AdmissionEvent::Allowed { identity } => {
            json!({ "kind": "admission_allowed", "identity": identity })
        }
        AdmissionEvent::Denied { identity } => {
            json!({ "kind": "admission_denied", "identity": identity })
        }
        AdmissionEvent::StoreFailure { identity, error, allowed } => json!({
            "kind": "store_failure",
            "identity": identity,
            "error": error,
            "allowed": *allowed,
        }),
    }
}
