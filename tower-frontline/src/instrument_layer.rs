use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::task::ready;
use std::time::Instant;

use http::Method;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Histogram;
use pin_project_lite::pin_project;
use tower::BoxError;
use tower::Layer;
use tower::Service;

use crate::error::FrontError;
use crate::event::Event;
use crate::event::Instrument;
use crate::request::ApiRequest;
use crate::request::ApiResponse;

/// Emits `request`/`response` events around the inner service.
#[derive(Debug, Clone)]
pub struct InstrumentLayer {
    instrument: Arc<dyn Instrument>,
}

impl InstrumentLayer {
    pub fn new(instrument: Arc<dyn Instrument>) -> Self {
        Self { instrument }
    }
}

impl<S> Layer<S> for InstrumentLayer {
    type Service = InstrumentService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InstrumentService::new(inner, Arc::clone(&self.instrument))
    }
}

#[derive(Debug, Clone)]
pub struct InstrumentService<S> {
    inner: S,
    instrument: Arc<dyn Instrument>,
    duration: Histogram<f64>,
}

impl<S> InstrumentService<S> {
    pub fn new(inner: S, instrument: Arc<dyn Instrument>) -> Self {
        let meter = global::meter("frontline");
        let duration = meter
            .f64_histogram("frontline.request.duration")
            .with_unit("s")
            .with_description("Wall clock time of API calls, retries and waits included")
            .build();

        Self {
            inner,
            instrument,
            duration,
        }
    }
}

impl<S> Service<ApiRequest> for InstrumentService<S>
where
    S: Service<ApiRequest, Response = ApiResponse, Error = BoxError>,
{
    type Response = ApiResponse;
    type Error = BoxError;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ApiRequest) -> Self::Future {
        let url = req.url.to_string();
        self.instrument.emit(&Event::Request {
            method: req.method.clone(),
            path: req.path.clone(),
            url: url.clone(),
        });

        let span = InFlight {
            instrument: Arc::clone(&self.instrument),
            duration: self.duration.clone(),
            method: req.method.clone(),
            path: req.path.clone(),
            url,
            started: Instant::now(),
            status: None,
        };

        ResponseFuture {
            inner: self.inner.call(req),
            span: Some(span),
        }
    }
}

pin_project! {
    /// Resolves with the inner result. The `response` event fires when the
    /// call settles, or when the future is dropped before it does.
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
        span: Option<InFlight>,
    }
}

impl<F> Future for ResponseFuture<F>
where
    F: Future<Output = Result<ApiResponse, BoxError>>,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));
        if let Some(mut span) = this.span.take() {
            span.status = match &result {
                Ok(response) => Some(response.status.as_u16()),
                Err(err) => err.downcast_ref::<FrontError>().and_then(FrontError::status),
            };
        }
        Poll::Ready(result)
    }
}

// Completion is reported from `Drop` so no exit path can skip it.
struct InFlight {
    instrument: Arc<dyn Instrument>,
    duration: Histogram<f64>,
    method: Method,
    path: String,
    url: String,
    started: Instant,
    status: Option<u16>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        let class = match self.status {
            Some(status) => format!("{}xx", status / 100),
            None => "none".to_string(),
        };
        self.duration.record(
            elapsed.as_secs_f64(),
            &[
                KeyValue::new("method", self.method.to_string()),
                KeyValue::new("status_class", class),
            ],
        );

        self.instrument.emit(&Event::Response {
            method: self.method.clone(),
            path: std::mem::take(&mut self.path),
            url: std::mem::take(&mut self.url),
            status: self.status,
            duration: elapsed,
        });
    }
}
