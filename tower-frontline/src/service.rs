use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use frontline_limit::Admission;
use frontline_limit::Strategy;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tokio::time::Instant;
use tokio::time::sleep;
use tower::BoxError;
use tower::Service;
use tower::ServiceExt;
use tracing::debug;

use crate::error::FrontError;
use crate::event::Event;
use crate::event::Instrument;
use crate::event::TracingInstrument;
use crate::layer::DEFAULT_SOFT_LIMIT;
use crate::request::RetryAfter;

#[derive(Clone, Debug)]
struct RateLimitServiceMetrics {
    delays: Counter<u64>,
    soft_limit_hits: Counter<u64>,
}

#[derive(Debug)]
pub struct RateLimitService<L, S>
where
    L: ?Sized,
{
    inner: S,
    limiter: Arc<L>,
    soft_limit: f64,
    instrument: Arc<dyn Instrument>,
    instruments: RateLimitServiceMetrics,
}

impl<L, S> Clone for RateLimitService<L, S>
where
    L: ?Sized,
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
            soft_limit: self.soft_limit,
            instrument: Arc::clone(&self.instrument),
            instruments: self.instruments.clone(),
        }
    }
}

impl<L, S, Req> Service<Req> for RateLimitService<L, S>
where
    L: Strategy + ?Sized + Send + Sync + 'static,
    S: Service<Req, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: RetryAfter + Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let limiter = Arc::clone(&self.limiter);
        let instrument = Arc::clone(&self.instrument);
        let instruments = self.instruments.clone();
        let soft_limit = self.soft_limit;

        Box::pin(async move {
            // The token is ours once `admit` returns; any wait happens outside
            // the bucket's critical section.
            let admission = limiter.admit(Instant::now().into_std());
            if let Admission::Delayed { wait, .. } = admission {
                instruments.delays.add(1, &[]);
                debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting for a token");
                sleep(wait).await;
            }

            let remaining = admission.remaining();
            if remaining <= soft_limit {
                instruments.soft_limit_hits.add(1, &[]);
                instrument.emit(&Event::RateLimitHit {
                    remaining_tokens: remaining,
                    threshold: soft_limit,
                });
            }

            let result = inner.oneshot(req).await;

            if let Some(delay) = server_backoff(&result) {
                debug!(delay_secs = delay.as_secs(), "honouring Retry-After");
                sleep(delay).await;
            }
            result
        })
    }
}

fn server_backoff<R: RetryAfter>(result: &Result<R, BoxError>) -> Option<Duration> {
    match result {
        Ok(response) => response.retry_after(),
        Err(err) => err
            .downcast_ref::<FrontError>()
            .and_then(FrontError::retry_after),
    }
}

impl<L, S> RateLimitService<L, S>
where
    L: ?Sized,
{
    pub fn new(inner: S, limiter: Arc<L>) -> Self {
        let meter = global::meter("frontline");
        let instruments = RateLimitServiceMetrics {
            delays: meter
                .u64_counter("frontline.rate_limit.delays")
                .with_description("Requests that waited for a token")
                .build(),
            soft_limit_hits: meter
                .u64_counter("frontline.rate_limit.soft_limit_hits")
                .with_description("Admissions at or below the soft limit")
                .build(),
        };

        Self {
            inner,
            limiter,
            soft_limit: DEFAULT_SOFT_LIMIT,
            instrument: Arc::new(TracingInstrument),
            instruments,
        }
    }

    pub fn with_soft_limit(mut self, soft_limit: f64) -> Self {
        self.soft_limit = soft_limit;
        self
    }

    pub fn with_instrument(mut self, instrument: Arc<dyn Instrument>) -> Self {
        self.instrument = instrument;
        self
    }
}
