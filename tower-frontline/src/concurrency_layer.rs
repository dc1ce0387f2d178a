use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use frontline_limit::ConcurrencyGate;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceExt;

/// Bounds the number of calls in flight through every service built from this
/// layer, using one shared [`ConcurrencyGate`].
#[derive(Debug, Clone)]
pub struct ConcurrencyLimitLayer {
    gate: ConcurrencyGate,
}

impl ConcurrencyLimitLayer {
    pub fn new(gate: ConcurrencyGate) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for ConcurrencyLimitLayer {
    type Service = ConcurrencyLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ConcurrencyLimitService {
            inner,
            gate: self.gate.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConcurrencyLimitService<S> {
    inner: S,
    gate: ConcurrencyGate,
}

impl<S, Req> Service<Req> for ConcurrencyLimitService<S>
where
    S: Service<Req, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        // Take the service that was driven to readiness and leave a clone behind.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let gate = self.gate.clone();

        Box::pin(async move {
            // Held until the inner call settles or this future is dropped.
            let _permit = gate.acquire().await?;
            inner.oneshot(req).await
        })
    }
}
