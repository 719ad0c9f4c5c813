//! Convenient re-exports for common tollgate types.
pub use crate::{
    admission::Admission,
    bucket::BucketConfig,
    distributed::{AtomicBucketStore, DistributedBucketEngine, FailureMode, StoreCredentials},
    error::{AdmissionError, ConfigError, StoreError},
    local::LocalBucketStore,
    middleware::AdmissionLayer,
    telemetry::{AdmissionEvent, LogSink, MemorySink, TelemetrySink},
};
