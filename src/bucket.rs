//! Token bucket state and the refill/consume transition.
//!
//! Everything here is plain arithmetic on `f64`; no locking and no I/O. The
//! local store wraps a [`Bucket`] in a mutex, the in-process atomic store runs
//! [`refill_and_consume`] under its own lock, and the Redis script performs the
//! same steps server-side.

use crate::error::ConfigError;

/// Tokens a single admission costs.
pub const TOKEN_COST: f64 = 1.0;

/// Capacity and refill rate shared by every bucket a limiter creates.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawBucketConfig"))]
pub struct BucketConfig {
    capacity: f64,
    refill_rate: f64,
}

impl BucketConfig {
    /// Validate and build a config. Both values must be finite and strictly positive.
    ///
    /// # Errors
    /// [`ConfigError::InvalidCapacity`] or [`ConfigError::InvalidRefillRate`].
    pub fn new(capacity: f64, refill_rate: f64) -> Result<Self, ConfigError> {
        if !capacity.is_finite() || capacity <= 0.0 {
            return Err(ConfigError::InvalidCapacity { provided: capacity });
        }
        if !refill_rate.is_finite() || refill_rate <= 0.0 {
            return Err(ConfigError::InvalidRefillRate { provided: refill_rate });
        }
        Ok(Self { capacity, refill_rate })
    }

    /// Maximum tokens a bucket can hold.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawBucketConfig {
    capacity: f64,
    refill_rate: f64,
}

#[cfg(feature = "serde")]
impl TryFrom<RawBucketConfig> for BucketConfig {
    type Error = ConfigError;

    fn try_from(raw: RawBucketConfig) -> Result<Self, Self::Error> {
        BucketConfig::new(raw.capacity, raw.refill_rate)
    }
}

/// Persistable bucket level: token count plus the time of the last refill in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    pub tokens: f64,
    pub last_refill: f64,
}

impl BucketState {
    /// A full bucket stamped at `now`.
    pub fn full(limits: &BucketConfig, now: f64) -> Self {
        Self { tokens: limits.capacity, last_refill: now }
    }
}

/// Apply one refill-then-consume step.
///
/// Negative or NaN elapsed time (a clock stepping backwards, or a peer with a
/// skewed clock) counts as zero, so the level can only move down by consuming.
/// Returns the new state and whether a token was taken.
pub fn refill_and_consume(state: BucketState, now: f64, limits: &BucketConfig) -> (BucketState, bool) {
    let elapsed = (now - state.last_refill).max(0.0);
    let mut tokens = (state.tokens + elapsed * limits.refill_rate).min(limits.capacity);
    // A stored level can fall outside the range after capacity is lowered or
    // a record is hand-edited.
    tokens = tokens.max(0.0);

    let allowed = tokens >= TOKEN_COST;
    if allowed {
        tokens -= TOKEN_COST;
    }
    (BucketState { tokens, last_refill: now }, allowed)
}

/// A single identity's bucket.
#[derive(Debug, Clone)]
pub struct Bucket {
    limits: BucketConfig,
    state: BucketState,
}

impl Bucket {
    /// New bucket holding `capacity` tokens, last refilled at `now` (seconds).
    pub fn new(limits: BucketConfig, now: f64) -> Self {
        Self { state: BucketState::full(&limits, now), limits }
    }

    /// Refill for the time since the last call, then try to take one token.
    pub fn try_consume(&mut self, now: f64) -> bool {
        let (next, allowed) = refill_and_consume(self.state, now, &self.limits);
        self.state = next;
        allowed
    }

    /// Token level as of the last transition (no refill applied).
    pub fn tokens(&self) -> f64 {
        self.state.tokens
    }

    pub fn last_refill(&self) -> f64 {
        self.state.last_refill
    }

    pub fn limits(&self) -> &BucketConfig {
        &self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(capacity: f64, rate: f64) -> BucketConfig {
        BucketConfig::new(capacity, rate).expect("valid limits")
    }

    #[test]
    fn rejects_non_positive_or_non_finite_limits() {
        assert!(matches!(
            BucketConfig::new(0.0, 1.0),
            Err(ConfigError::InvalidCapacity { .. })
        ));
        assert!(matches!(
            BucketConfig::new(f64::INFINITY, 1.0),
            Err(ConfigError::InvalidCapacity { .. })
        ));
        assert!(matches!(
            BucketConfig::new(3.0, -0.5),
            Err(ConfigError::InvalidRefillRate { .. })
        ));
        assert!(matches!(
            BucketConfig::new(3.0, f64::NAN),
            Err(ConfigError::InvalidRefillRate { .. })
        ));
    }

    #[test]
    fn fresh_bucket_admits_floor_capacity() {
        let mut bucket = Bucket::new(limits(3.7, 0.001), 0.0);
        let admitted = (0..10).filter(|_| bucket.try_consume(0.0)).count();
        assert_eq!(admitted, 3);
        assert!((bucket.tokens() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn five_seconds_at_point_two_refills_exactly_one_token() {
        let mut bucket = Bucket::new(limits(3.0, 0.2), 100.0);
        assert!(bucket.try_consume(100.0));
        assert!(bucket.try_consume(100.0));
        assert!(bucket.try_consume(100.0));
        assert!(!bucket.try_consume(100.0));
        assert!(bucket.try_consume(105.0));
        assert!(!bucket.try_consume(105.0));
    }

    #[test]
    fn denial_keeps_partial_tokens() {
        let mut bucket = Bucket::new(limits(1.0, 0.5), 0.0);
        assert!(bucket.try_consume(0.0));
        assert!(!bucket.try_consume(1.0));
        assert!((bucket.tokens() - 0.5).abs() < 1e-9);
        assert!(bucket.try_consume(2.0));
    }

    #[test]
    fn long_idle_never_overfills() {
        let mut bucket = Bucket::new(limits(5.0, 10.0), 0.0);
        assert!(bucket.try_consume(0.0));
        assert!(bucket.try_consume(1.0e9));
        assert!(bucket.tokens() <= 5.0);
        assert!((bucket.tokens() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn backwards_clock_does_not_drain_tokens() {
        let mut bucket = Bucket::new(limits(2.0, 1.0), 50.0);
        assert!(bucket.try_consume(50.0));
        assert!(bucket.try_consume(50.0));
        assert!(!bucket.try_consume(10.0));
        assert_eq!(bucket.tokens(), 0.0);
        assert_eq!(bucket.last_refill(), 10.0);
    }

    #[test]
    fn stored_level_above_new_capacity_is_clamped() {
        let lowered = limits(2.0, 1.0);
        let state = BucketState { tokens: 10.0, last_refill: 0.0 };
        let (next, allowed) = refill_and_consume(state, 0.0, &lowered);
        assert!(allowed);
        assert!((next.tokens - 1.0).abs() < 1e-9);
    }
}
