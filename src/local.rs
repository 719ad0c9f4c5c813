//! In-process bucket registry.
//!
//! Locking is two-level. The registry map sits behind an `RwLock` that is only
//! write-locked to insert a bucket for an identity seen for the first time;
//! every bucket then has its own `Mutex` around the refill/consume step. Callers
//! for different identities never wait on each other's transitions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::admission::Admission;
use crate::bucket::{Bucket, BucketConfig};
use crate::clock::{Clock, MonotonicClock};

/// Shared handle to one identity's bucket.
#[derive(Clone, Debug)]
pub struct BucketHandle {
    pub(crate) bucket: Arc<Mutex<Bucket>>,
}

impl BucketHandle {
    fn new(bucket: Bucket) -> Self {
        Self { bucket: Arc::new(Mutex::new(bucket)) }
    }

    /// Run the refill/consume transition under the bucket lock.
    ///
    /// The clock is read after the lock is taken, so the times a bucket sees
    /// are ordered the same way as its transitions. A reading taken outside
    /// the lock could land after a later one and rewind `last_refill`.
    pub fn try_acquire<C: Clock + ?Sized>(&self, clock: &C) -> bool {
        // A panic cannot leave the bucket half-updated: the transition computes
        // the next state before assigning it.
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.try_consume(clock.now_secs())
    }

    /// Token level as of the last transition.
    pub fn tokens(&self) -> f64 {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner).tokens()
    }

    /// Copy of the bucket as of the last transition.
    pub fn snapshot(&self) -> Bucket {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// True if both handles point at the same bucket.
    pub fn same_bucket(&self, other: &BucketHandle) -> bool {
        Arc::ptr_eq(&self.bucket, &other.bucket)
    }
}

/// Process-local token buckets keyed by identity.
///
/// Construct one per service and share it (it is cheap to clone; clones share
/// the registry). Buckets are created full on first use and live as long as
/// the store.
#[derive(Clone, Debug)]
pub struct LocalBucketStore<C = MonotonicClock> {
    buckets: Arc<RwLock<HashMap<String, BucketHandle>>>,
    defaults: BucketConfig,
    clock: C,
}

impl LocalBucketStore<MonotonicClock> {
    /// Create a store whose new buckets use `defaults`.
    pub fn new(defaults: BucketConfig) -> Self {
        Self::with_clock(defaults, MonotonicClock::default())
    }
}

impl<C: Clock> LocalBucketStore<C> {
    /// Use a custom clock (e.g. a manual clock in tests).
    pub fn with_clock(defaults: BucketConfig, clock: C) -> Self {
        Self { buckets: Arc::new(RwLock::new(HashMap::new())), defaults, clock }
    }

    /// Return the identity's bucket, creating a full one if this is the first request.
    pub fn get_or_create(&self, identity: &str) -> BucketHandle {
        {
            let map = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(handle) = map.get(identity) {
                return handle.clone();
            }
        }

        let mut map = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have inserted between dropping the read lock and
        // taking the write lock; entry() keeps the first bucket.
        map.entry(identity.to_string())
            .or_insert_with(|| {
                debug!(
                    target: "tollgate::local",
                    identity = %identity,
                    capacity = self.defaults.capacity(),
                    refill_rate = self.defaults.refill_rate(),
                    "creating bucket"
                );
                BucketHandle::new(Bucket::new(self.defaults, self.clock.now_secs()))
            })
            .clone()
    }

    /// Apply the refill/consume transition to the identity's bucket.
    pub fn try_acquire(&self, identity: &str) -> bool {
        let handle = self.get_or_create(identity);
        let allowed = handle.try_acquire(&self.clock);
        debug!(target: "tollgate::local", identity = %identity, allowed, "admission decision");
        allowed
    }

    /// Existing bucket for an identity, without creating one.
    pub fn get(&self, identity: &str) -> Option<BucketHandle> {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner).get(identity).cloned()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner).contains_key(identity)
    }

    /// Number of identities with a bucket.
    pub fn len(&self) -> usize {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn defaults(&self) -> &BucketConfig {
        &self.defaults
    }
}

#[async_trait]
impl<C: Clock + 'static> Admission for LocalBucketStore<C> {
    async fn is_allowed(&self, identity: &str) -> bool {
        self.try_acquire(identity)
    }
}
