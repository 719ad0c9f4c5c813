use super::events::AdmissionEvent;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tower::Service;

/// A telemetry sink that consumes admission events.
pub trait TelemetrySink:
    tower::Service<AdmissionEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
///
/// Decisions must not depend on telemetry: if a sink is not ready or returns
/// an error, the event is dropped.
pub async fn emit_best_effort<S>(sink: S, event: AdmissionEvent)
where
    S: tower::Service<AdmissionEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Discards every event. The engine's default.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl Service<AdmissionEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: AdmissionEvent) -> Self::Future {
        ready(Ok(()))
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// A telemetry sink that logs events using the `tracing` crate.
///
/// Store failures are logged at `warn`, decisions at `debug`.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<AdmissionEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: AdmissionEvent) -> Self::Future {
        if event.is_store_failure() {
            tracing::warn!(target: "tollgate::telemetry", event = %event, "admission_event");
        } else {
            tracing::debug!(target: "tollgate::telemetry", event = %event, "admission_event");
        }
        ready(Ok(()))
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps the most recent events in memory; once `capacity` is reached each new
/// event pushes out the oldest. Clones share the buffer.
///
/// Meant for tests and for exposing recent store failures on a debug endpoint.
#[derive(Clone, Debug)]
pub struct MemorySink {
    ring: Arc<Mutex<VecDeque<AdmissionEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Default retention of 10 000 events.
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// A capacity of zero is raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1_024)))),
            capacity,
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> Vec<AdmissionEvent> {
        self.ring().iter().cloned().collect()
    }

    /// Retained store failures, oldest first.
    pub fn store_failures(&self) -> Vec<AdmissionEvent> {
        self.ring().iter().filter(|e| e.is_store_failure()).cloned().collect()
    }

    pub fn clear(&self) {
        self.ring().clear();
    }

    pub fn len(&self) -> usize {
        self.ring().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events pushed out since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn ring(&self) -> MutexGuard<'_, VecDeque<AdmissionEvent>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: AdmissionEvent) {
        let mut ring = self.ring();
        if ring.len() == self.capacity {
            ring.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        ring.push_back(event);
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<AdmissionEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: AdmissionEvent) -> Self::Future {
        self.record(event);
        ready(Ok(()))
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    fn allowed(id: &str) -> AdmissionEvent {
        AdmissionEvent::Allowed { identity: id.into() }
    }

    fn outage(id: &str) -> AdmissionEvent {
        AdmissionEvent::StoreFailure { identity: id.into(), error: "down".into(), allowed: true }
    }

    #[tokio::test]
    async fn ring_drops_oldest_past_capacity() {
        let sink = MemorySink::with_capacity(3);
        for id in ["a", "b", "c", "d", "e"] {
            sink.clone().oneshot(allowed(id)).await.unwrap();
        }
        assert_eq!(sink.len(), 3);
        assert_eq!(sink.evicted(), 2);
        let kept: Vec<_> = sink.events().iter().map(|e| e.identity().to_string()).collect();
        assert_eq!(kept, ["c", "d", "e"]);
    }

    #[tokio::test]
    async fn zero_capacity_still_keeps_latest() {
        let sink = MemorySink::with_capacity(0);
        emit_best_effort(sink.clone(), allowed("x")).await;
        emit_best_effort(sink.clone(), outage("y")).await;
        assert_eq!(sink.capacity(), 1);
        assert_eq!(sink.events(), vec![outage("y")]);
    }

    #[tokio::test]
    async fn store_failures_are_filterable() {
        let sink = MemorySink::new();
        for event in [allowed("a"), outage("b"), allowed("c"), outage("d")] {
            emit_best_effort(sink.clone(), event).await;
        }
        assert_eq!(sink.store_failures(), vec![outage("b"), outage("d")]);
        sink.clear();
        assert!(sink.is_empty());
    }

    #[derive(Clone)]
    struct Refusing;

    impl Service<AdmissionEvent> for Refusing {
        type Response = ();
        type Error = std::io::Error;
        type Future = Ready<Result<(), std::io::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed")))
        }

        fn call(&mut self, _event: AdmissionEvent) -> Self::Future {
            unreachable!("never ready")
        }
    }

    #[tokio::test]
    async fn emit_ignores_sinks_that_refuse() {
        emit_best_effort(Refusing, outage("z")).await;
    }

    #[tokio::test]
    async fn null_and_log_sinks_accept_everything() {
        NullSink.oneshot(outage("n")).await.unwrap();
        LogSink.oneshot(outage("l")).await.unwrap();
        LogSink.oneshot(allowed("l")).await.unwrap();
    }
}
