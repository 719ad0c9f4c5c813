#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # tollgate
//!
//! Per-identity request quotas using the token-bucket algorithm.
//!
//! ## Deployment shapes
//!
//! - **In-process**: [`LocalBucketStore`] keeps one bucket per identity in
//!   memory. A registry lock guards only bucket creation; each bucket has its
//!   own lock, so identities never serialize behind one another.
//! - **Shared store**: [`DistributedBucketEngine`] keeps buckets in an external
//!   store and runs the whole refill/consume step there as one atomic
//!   evaluation, so any number of processes can share a quota. Store errors
//!   fail open unless [`FailureMode::Closed`] is chosen.
//!
//! Both implement [`Admission`], and [`AdmissionLayer`] plugs either into a
//! tower stack.
//!
//! ## Quick Start
//!
//! ```rust
//! use tollgate::{Admission, BucketConfig, LocalBucketStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     // 3 tokens, refilled at one token every five seconds
//!     let limiter = LocalBucketStore::new(BucketConfig::new(3.0, 0.2).unwrap());
//!
//!     for _ in 0..3 {
//!         assert!(limiter.is_allowed("alice").await);
//!     }
//!     assert!(!limiter.is_allowed("alice").await);
//!     assert!(limiter.is_allowed("bob").await);
//! }
//! ```

pub mod adaptive;
pub mod admission;
pub mod bucket;
pub mod clock;
pub mod distributed;
pub mod error;
pub mod local;
pub mod middleware;
pub mod prelude;
pub mod telemetry;

// Re-exports
pub use adaptive::DynamicConfig;
pub use admission::Admission;
pub use bucket::{Bucket, BucketConfig, BucketState};
pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use distributed::{
    AtomicBucketStore, DistributedBucketEngine, EvalRequest, FailureMode, InMemoryAtomicStore,
    StoreCredentials,
};
pub use error::{AdmissionError, ConfigError, StoreError};
pub use local::{BucketHandle, LocalBucketStore};
pub use middleware::{AdmissionLayer, AdmissionService};
