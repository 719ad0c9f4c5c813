//! Error types for admission, configuration, and shared-store evaluation
use std::fmt;
use std::time::Duration;

/// Construction-time configuration failures. Always fatal: a limiter is never
/// built from a config that produced one of these.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("bucket capacity must be finite and > 0 (got {provided})")]
    InvalidCapacity { provided: f64 },
    #[error("refill rate must be finite and > 0 tokens/sec (got {provided})")]
    InvalidRefillRate { provided: f64 },
    #[error("shared store {field} is required")]
    MissingCredential { field: &'static str },
    #[error("store timeout must be non-zero (got {provided:?})")]
    InvalidTimeout { provided: Duration },
    #[error("idle expiry must be at least one second (got {provided:?})")]
    InvalidIdleTtl { provided: Duration },
}

/// Failures of a single atomic evaluation against a shared store.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store evaluation timed out after {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("unexpected reply from store: {0}")]
    MalformedReply(String),
}

impl StoreError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Error surfaced by [`AdmissionService`](crate::middleware::AdmissionService).
#[derive(Debug, Clone)]
pub enum AdmissionError<E> {
    /// The request carried no identity; rejected before the limiter is consulted.
    MissingIdentity,
    /// The identity's bucket was empty.
    RateLimited { identity: String },
    /// The wrapped service failed
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for AdmissionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingIdentity => write!(f, "request identity required"),
            Self::RateLimited { identity } => {
                write!(f, "too many requests for '{}'; try again later", identity)
            }
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AdmissionError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> AdmissionError<E> {
    /// Check if the request was rejected for lacking an identity (a client error)
    pub fn is_missing_identity(&self) -> bool {
        matches!(self, Self::MissingIdentity)
    }
    /// Check if the request was rejected by the limiter
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }
    /// Identity that was rate limited, if any.
    pub fn limited_identity(&self) -> Option<&str> {
        match self {
            Self::RateLimited { identity } => Some(identity),
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
    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn rate_limited_display_names_identity() {
        let err: AdmissionError<io::Error> =
            AdmissionError::RateLimited { identity: "alice".into() };
        let msg = format!("{}", err);
        assert!(msg.contains("alice"));
        assert!(msg.contains("too many requests"));
    }

    #[test]
    fn missing_identity_display() {
        let err: AdmissionError<io::Error> = AdmissionError::MissingIdentity;
        assert_eq!(err.to_string(), "request identity required");
    }

    #[test]
    fn predicates_cover_all_variants() {
        let missing: AdmissionError<io::Error> = AdmissionError::MissingIdentity;
        assert!(missing.is_missing_identity());
        assert!(!missing.is_rate_limited());

        let limited: AdmissionError<io::Error> =
            AdmissionError::RateLimited { identity: "bob".into() };
        assert!(limited.is_rate_limited());
        assert_eq!(limited.limited_identity(), Some("bob"));

        let inner = AdmissionError::Inner(io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(inner.is_inner());
        assert!(inner.limited_identity().is_none());
    }

    #[test]
    fn source_only_for_inner() {
        let inner = AdmissionError::Inner(io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(inner.source().is_some());
        assert_eq!(inner.as_inner().map(|e| e.to_string()), Some("boom".to_string()));
        assert_eq!(inner.into_inner().unwrap().to_string(), "boom");

        let limited: AdmissionError<io::Error> =
            AdmissionError::RateLimited { identity: "bob".into() };
        assert!(limited.source().is_none());
    }

    #[test]
    fn config_error_messages() {
        let err = ConfigError::MissingCredential { field: "password" };
        assert_eq!(err.to_string(), "shared store password is required");
        let err = ConfigError::InvalidCapacity { provided: -1.0 };
        assert!(err.to_string().contains("-1"));
    }

    #[test]
    fn store_error_timeout_predicate() {
        let err = StoreError::Timeout { timeout: Duration::from_millis(250) };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("250ms"));
        assert!(!StoreError::Backend("connection refused".into()).is_timeout());
    }
}
