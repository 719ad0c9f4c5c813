//! Token buckets shared across processes.
//!
//! - [`DistributedBucketEngine`]: builds the key, bounds the round trip with a
//!   timeout, and turns store failures into a decision (fail open by default).
//! - [`AtomicBucketStore`]: the seam a backend implements. The whole
//!   refill/consume step runs inside the store as one indivisible operation.
//! - [`InMemoryAtomicStore`]: an in-process backend for tests and single-node use.
//!   The Redis backend lives in the `tollgate-redis` crate.

pub mod credentials;
pub mod engine;
pub mod store;

pub use credentials::StoreCredentials;
pub use engine::{
    DistributedBucketEngine, EngineBuilder, FailureMode, DEFAULT_IDLE_TTL, DEFAULT_KEY_PREFIX,
    DEFAULT_STORE_TIMEOUT,
};
pub use store::{AtomicBucketStore, EvalRequest, InMemoryAtomicStore, SWEEP_INTERVAL};
