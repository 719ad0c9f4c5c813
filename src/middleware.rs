//! Tower middleware that gates requests on an [`Admission`] decision.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower_layer::Layer;
use tower_service::Service;
use tracing::debug;

use crate::admission::Admission;
use crate::error::AdmissionError;

/// A layer that admits requests through an [`Admission`] limiter.
///
/// `extract` pulls the identity out of a request. `None` or an empty string
/// rejects the request with [`AdmissionError::MissingIdentity`] without
/// touching the limiter.
pub struct AdmissionLayer<A, F> {
    admission: Arc<A>,
    extract: Arc<F>,
}

impl<A, F> Clone for AdmissionLayer<A, F> {
    fn clone(&self) -> Self {
        Self { admission: self.admission.clone(), extract: self.extract.clone() }
    }
}

impl<A, F> std::fmt::Debug for AdmissionLayer<A, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionLayer").field("extract", &"<extractor>").finish()
    }
}

impl<A, F> AdmissionLayer<A, F> {
    /// Create a new admission layer.
    pub fn new(admission: A, extract: F) -> Self {
        Self::from_shared(Arc::new(admission), extract)
    }

    /// Share an existing limiter (e.g. one also consulted elsewhere).
    pub fn from_shared(admission: Arc<A>, extract: F) -> Self {
        Self { admission, extract: Arc::new(extract) }
    }
}

impl<S, A, F> Layer<S> for AdmissionLayer<A, F> {
    type Service = AdmissionService<S, A, F>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService {
            inner: service,
            admission: self.admission.clone(),
            extract: self.extract.clone(),
        }
    }
}

/// Middleware service produced by [`AdmissionLayer`].
pub struct AdmissionService<S, A, F> {
    inner: S,
    admission: Arc<A>,
    extract: Arc<F>,
}

impl<S: Clone, A, F> Clone for AdmissionService<S, A, F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            admission: self.admission.clone(),
            extract: self.extract.clone(),
        }
    }
}

impl<S: std::fmt::Debug, A, F> std::fmt::Debug for AdmissionService<S, A, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionService").field("inner", &self.inner).finish()
    }
}

impl<S, A, F, Req> Service<Req> for AdmissionService<S, A, F>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    A: Admission + 'static,
    F: Fn(&Req) -> Option<String> + Send + Sync + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = AdmissionError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let admission = self.admission.clone();
        let identity = (self.extract)(&req).filter(|id| !id.is_empty());
        // Use the service that was driven to readiness and leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let Some(identity) = identity else {
                debug!(target: "tollgate::middleware", "rejecting request without identity");
                return Err(AdmissionError::MissingIdentity);
            };
            if admission.is_allowed(&identity).await {
                inner.call(req).await.map_err(AdmissionError::Inner)
            } else {
                Err(AdmissionError::RateLimited { identity })
            }
        })
    }
}
