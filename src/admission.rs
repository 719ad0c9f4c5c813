//! The admission contract shared by every limiter.

use std::sync::Arc;

use async_trait::async_trait;

/// Decide whether one more request for `identity` may proceed.
///
/// Implemented by [`LocalBucketStore`](crate::local::LocalBucketStore) and
/// [`DistributedBucketEngine`](crate::distributed::DistributedBucketEngine).
/// Never fails: backends that can hit I/O errors resolve them to a decision
/// internally. `identity` is expected to be non-empty; middleware rejects
/// requests without one before calling in.
#[async_trait]
pub trait Admission: Send + Sync {
    async fn is_allowed(&self, identity: &str) -> bool;
}

#[async_trait]
impl<A: Admission + ?Sized> Admission for Arc<A> {
    async fn is_allowed(&self, identity: &str) -> bool {
        (**self).is_allowed(identity).await
    }
}

#[async_trait]
impl<A: Admission + ?Sized> Admission for Box<A> {
    async fn is_allowed(&self, identity: &str) -> bool {
        (**self).is_allowed(identity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::BucketConfig;
    use crate::local::LocalBucketStore;

    #[tokio::test]
    async fn boxed_admission_delegates() {
        let store = LocalBucketStore::new(BucketConfig::new(1.0, 0.01).unwrap());
        let boxed: Box<dyn Admission> = Box::new(store.clone());
        assert!(boxed.is_allowed("alice").await);
        assert!(!boxed.is_allowed("alice").await);
        assert!(store.contains("alice"));
    }

    #[tokio::test]
    async fn shared_admission_delegates() {
        let store = LocalBucketStore::new(BucketConfig::new(2.0, 0.01).unwrap());
        let shared: Arc<dyn Admission> = Arc::new(store);
        let other = shared.clone();
        assert!(shared.is_allowed("bob").await);
        assert!(other.is_allowed("bob").await);
        assert!(!shared.is_allowed("bob").await);
    }
}
