use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::bucket::{refill_and_consume, BucketConfig, BucketState};
use crate::error::StoreError;

/// Inputs for one evaluation. Everything the store needs travels with the call;
/// the store holds no configuration of its own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalRequest {
    pub limits: BucketConfig,
    /// Caller's clock reading in fractional Unix seconds.
    pub now: f64,
    /// Inactivity window after which the stored record is reclaimed.
    pub idle_ttl: Duration,
}

/// A store that can run the whole refill/consume step for one key as a single
/// indivisible operation.
///
/// Implementations must, without any other evaluation for the same key
/// interleaving:
/// 1. read `(tokens, last_time)` for `key`, treating a missing record as `(capacity, now)`;
/// 2. refill by `max(0, now - last_time) * rate`, capped at capacity;
/// 3. take one token if at least one is present;
/// 4. write back `(tokens, now)`;
/// 5. (re)arm the idle expiry;
/// 6. report whether a token was taken.
///
/// A failed evaluation must leave the stored record unchanged.
#[async_trait]
pub trait AtomicBucketStore: Send + Sync {
    async fn evaluate(&self, key: &str, request: EvalRequest) -> Result<bool, StoreError>;
}

#[async_trait]
impl<S: AtomicBucketStore + ?Sized> AtomicBucketStore for Arc<S> {
    async fn evaluate(&self, key: &str, request: EvalRequest) -> Result<bool, StoreError> {
        (**self).evaluate(key, request).await
    }
}

#[derive(Debug, Clone, Copy)]
struct StoredBucket {
    state: BucketState,
    expires_at: f64,
}

/// Evaluations between sweeps of expired records.
pub const SWEEP_INTERVAL: usize = 256;

#[derive(Debug, Default)]
struct Records {
    buckets: HashMap<String, StoredBucket>,
    since_sweep: usize,
}

impl Records {
    fn sweep(&mut self, now: f64) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, entry| now < entry.expires_at);
        self.since_sweep = 0;
        before - self.buckets.len()
    }
}

/// Shared store living in this process.
///
/// Evaluations run under one mutex, so they are atomic per key (and across
/// keys). Expiry is judged against the `now` each request carries rather than
/// a local clock, which keeps idle reclamation deterministic under a manual
/// clock. Expired records are swept every [`SWEEP_INTERVAL`] evaluations, so
/// identities that never return do not accumulate. Useful for tests and for
/// running the engine without Redis.
#[derive(Default, Clone, Debug)]
pub struct InMemoryAtomicStore {
    data: Arc<Mutex<Records>>,
}

impl InMemoryAtomicStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stored state for `key` if it has not expired as of `now`.
    pub fn get(&self, key: &str, now: f64) -> Option<BucketState> {
        self.lock().buckets.get(key).filter(|entry| now < entry.expires_at).map(|entry| entry.state)
    }

    /// Drop every record whose idle window has passed as of `now`.
    pub fn purge_expired(&self, now: f64) -> usize {
        self.lock().sweep(now)
    }

    /// Number of records held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.lock().buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AtomicBucketStore for InMemoryAtomicStore {
    async fn evaluate(&self, key: &str, request: EvalRequest) -> Result<bool, StoreError> {
        let EvalRequest { limits, now, idle_ttl } = request;
        let mut records = self.lock();

        let current = match records.buckets.get(key) {
            Some(entry) if now < entry.expires_at => entry.state,
            _ => BucketState::full(&limits, now),
        };
        let (next, allowed) = refill_and_consume(current, now, &limits);
        records.buckets.insert(
            key.to_string(),
            StoredBucket { state: next, expires_at: now + idle_ttl.as_secs_f64() },
        );

        records.since_sweep += 1;
        if records.since_sweep >= SWEEP_INTERVAL {
            records.sweep(now);
        }
        Ok(allowed)
    }
}
