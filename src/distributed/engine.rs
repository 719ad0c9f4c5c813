use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::adaptive::DynamicConfig;
use crate::admission::Admission;
use crate::bucket::BucketConfig;
use crate::clock::{Clock, SystemClock};
use crate::distributed::store::{AtomicBucketStore, EvalRequest};
use crate::error::{ConfigError, StoreError};
use crate::telemetry::{emit_best_effort, AdmissionEvent, NullSink, TelemetrySink};

/// Prefix put in front of every identity to form its store key.
pub const DEFAULT_KEY_PREFIX: &str = "userKey:";
/// Stored buckets idle for this long are reclaimed by the store.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(60);
/// Upper bound on one store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// Decision returned when the store cannot complete an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Admit the request. Availability wins over strict limiting.
    #[default]
    Open,
    /// Reject the request.
    Closed,
}

impl FailureMode {
    fn decision(self) -> bool {
        matches!(self, FailureMode::Open)
    }
}

type EmitFn = Arc<dyn Fn(AdmissionEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

fn emitter<K>(sink: K) -> EmitFn
where
    K: TelemetrySink + Sync,
    K::Future: Send + 'static,
{
    Arc::new(move |event| Box::pin(emit_best_effort(sink.clone(), event)))
}

/// Token buckets kept in a shared store and updated by one atomic evaluation per call.
///
/// No local locking: every process running an engine against the same store
/// sees a single, totally ordered sequence of decisions per identity.
pub struct DistributedBucketEngine<S> {
    store: S,
    limits: DynamicConfig<BucketConfig>,
    key_prefix: String,
    idle_ttl: Duration,
    timeout: Duration,
    failure_mode: FailureMode,
    clock: Arc<dyn Clock>,
    emit: EmitFn,
}

impl<S> std::fmt::Debug for DistributedBucketEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedBucketEngine")
            .field("limits", &self.limits.get())
            .field("key_prefix", &self.key_prefix)
            .field("idle_ttl", &self.idle_ttl)
            .field("timeout", &self.timeout)
            .field("failure_mode", &self.failure_mode)
            .field("clock", &self.clock)
            .field("sink", &"<sink>")
            .finish()
    }
}

impl<S: AtomicBucketStore> DistributedBucketEngine<S> {
    /// Start building an engine over `store` with the given default limits.
    pub fn builder(store: S, limits: BucketConfig) -> EngineBuilder<S> {
        EngineBuilder::new(store, limits)
    }

    /// Store key for an identity.
    pub fn key_for(&self, identity: &str) -> String {
        format!("{}{}", self.key_prefix, identity)
    }

    /// Handle for retuning capacity and rate while running. Changes apply from
    /// the next evaluation; stored buckets are not rewritten.
    pub fn limits(&self) -> &DynamicConfig<BucketConfig> {
        &self.limits
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// One admission check. Store failures and timeouts are reported to the
    /// telemetry sink and resolved per the configured [`FailureMode`]; they
    /// never reach the caller. No retries.
    pub async fn is_allowed(&self, identity: &str) -> bool {
        let key = self.key_for(identity);
        let request =
            EvalRequest { limits: *self.limits.get(), now: self.clock.now_secs(), idle_ttl: self.idle_ttl };

        let outcome = match tokio::time::timeout(self.timeout, self.store.evaluate(&key, request)).await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout { timeout: self.timeout }),
        };

        let event = match outcome {
            Ok(allowed) => {
                debug!(target: "tollgate::distributed", identity = %identity, allowed, "admission decision");
                if allowed {
                    AdmissionEvent::Allowed { identity: identity.to_string() }
                } else {
                    AdmissionEvent::Denied { identity: identity.to_string() }
                }
            }
            Err(error) => {
                let allowed = self.failure_mode.decision();
                warn!(
                    target: "tollgate::distributed",
                    identity = %identity,
                    key = %key,
                    error = %error,
                    allowed,
                    "store evaluation failed"
                );
                AdmissionEvent::StoreFailure {
                    identity: identity.to_string(),
                    error: error.to_string(),
                    allowed,
                }
            }
        };
        let allowed = event.allowed();
        // A stalled sink must not hold up the decision.
        if tokio::time::timeout(self.timeout, (self.emit)(event)).await.is_err() {
            debug!(target: "tollgate::distributed", identity = %identity, "telemetry sink not ready; event dropped");
        }
        allowed
    }
}

#[async_trait]
impl<S: AtomicBucketStore> Admission for DistributedBucketEngine<S> {
    async fn is_allowed(&self, identity: &str) -> bool {
        DistributedBucketEngine::is_allowed(self, identity).await
    }
}

/// Builder for [`DistributedBucketEngine`].
pub struct EngineBuilder<S> {
    store: S,
    limits: BucketConfig,
    key_prefix: String,
    idle_ttl: Duration,
    timeout: Duration,
    failure_mode: FailureMode,
    clock: Arc<dyn Clock>,
    emit: EmitFn,
}

impl<S: AtomicBucketStore> EngineBuilder<S> {
    fn new(store: S, limits: BucketConfig) -> Self {
        Self {
            store,
            limits,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            idle_ttl: DEFAULT_IDLE_TTL,
            timeout: DEFAULT_STORE_TIMEOUT,
            failure_mode: FailureMode::Open,
            clock: Arc::new(SystemClock),
            emit: emitter(NullSink),
        }
    }

    /// Bound on one store round trip. A timeout is handled like any other store error.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Inactivity window after which the store drops a bucket. Whole seconds.
    pub fn idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }

    /// Clock supplying `now` for each evaluation. Every process sharing a store
    /// must use the same epoch, so the default is wall-clock Unix time.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Sink receiving one [`AdmissionEvent`] per call.
    pub fn with_sink<K>(mut self, sink: K) -> Self
    where
        K: TelemetrySink + Sync,
        K::Future: Send + 'static,
    {
        self.emit = emitter(sink);
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    /// [`ConfigError::InvalidTimeout`] for a zero timeout and
    /// [`ConfigError::InvalidIdleTtl`] for an idle window under one second.
    pub fn build(self) -> Result<DistributedBucketEngine<S>, ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout { provided: self.timeout });
        }
        if self.idle_ttl.as_secs() == 0 {
            return Err(ConfigError::InvalidIdleTtl { provided: self.idle_ttl });
        }
        Ok(DistributedBucketEngine {
            store: self.store,
            limits: DynamicConfig::new(self.limits),
            key_prefix: self.key_prefix,
            idle_ttl: Duration::from_secs(self.idle_ttl.as_secs()),
            timeout: self.timeout,
            failure_mode: self.failure_mode,
            clock: self.clock,
            emit: self.emit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::distributed::store::InMemoryAtomicStore;
    use crate::telemetry::MemorySink;

    struct BrokenStore;

    #[async_trait]
    impl AtomicBucketStore for BrokenStore {
        async fn evaluate(&self, _key: &str, _request: EvalRequest) -> Result<bool, StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }
    }

    fn limits() -> BucketConfig {
        BucketConfig::new(2.0, 1.0).unwrap()
    }

    #[test]
    fn defaults_match_wire_contract() {
        let engine = DistributedBucketEngine::builder(InMemoryAtomicStore::new(), limits())
            .build()
            .unwrap();
        assert_eq!(engine.key_for("alice"), "userKey:alice");
        assert_eq!(engine.failure_mode(), FailureMode::Open);
        assert_eq!(engine.idle_ttl, Duration::from_secs(60));
    }

    #[test]
    fn rejects_zero_timeout_and_sub_second_ttl() {
        let err = DistributedBucketEngine::builder(InMemoryAtomicStore::new(), limits())
            .timeout(Duration::ZERO)
            .build()
            .expect_err("zero timeout");
        assert!(matches!(err, ConfigError::InvalidTimeout { .. }));

        let err = DistributedBucketEngine::builder(InMemoryAtomicStore::new(), limits())
            .idle_ttl(Duration::from_millis(500))
            .build()
            .expect_err("sub-second ttl");
        assert!(matches!(err, ConfigError::InvalidIdleTtl { .. }));
    }

    #[tokio::test]
    async fn custom_prefix_is_used_for_keys() {
        let store = InMemoryAtomicStore::new();
        let clock = ManualClock::starting_at(1_000_000);
        let engine = DistributedBucketEngine::builder(store.clone(), limits())
            .key_prefix("quota:")
            .with_clock(clock)
            .build()
            .unwrap();
        assert!(engine.is_allowed("erin").await);
        assert!(store.get("quota:erin", 1_000.0).is_some());
        assert!(store.get("userKey:erin", 1_000.0).is_none());
    }

    #[tokio::test]
    async fn fail_closed_denies_on_store_error() {
        let sink = MemorySink::new();
        let engine = DistributedBucketEngine::builder(BrokenStore, limits())
            .failure_mode(FailureMode::Closed)
            .with_sink(sink.clone())
            .build()
            .unwrap();
        assert!(!engine.is_allowed("frank").await);
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            AdmissionEvent::StoreFailure { allowed: false, error, .. } if error.contains("connection refused")
        ));
    }

    #[tokio::test]
    async fn retuned_limits_apply_to_next_call() {
        let clock = ManualClock::starting_at(1_000_000);
        let engine = DistributedBucketEngine::builder(InMemoryAtomicStore::new(), limits())
            .with_clock(clock)
            .build()
            .unwrap();
        assert!(engine.is_allowed("gina").await);
        assert!(engine.is_allowed("gina").await);
        assert!(!engine.is_allowed("gina").await);

        // Raising capacity does not rewrite the stored level...
        engine.limits().set(BucketConfig::new(5.0, 1.0).unwrap());
        assert!(!engine.is_allowed("gina").await);

        // ...but a brand-new identity starts at the raised capacity.
        let admitted = {
            let mut n = 0;
            for _ in 0..10 {
                if engine.is_allowed("hank").await {
                    n += 1;
                }
            }
            n
        };
        assert_eq!(admitted, 5);
    }
}
