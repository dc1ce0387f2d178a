use std::sync::Arc;

use frontline_limit::ConcurrencyGate;
use frontline_limit::Strategy;
use tower::BoxError;
use tower::Service;
use tower::ServiceBuilder;
use tower::layer::util::Stack;
use tower::retry::RetryLayer;
use tower::util::BoxCloneSyncService;

use crate::ConcurrencyLimitLayer;
use crate::InstrumentLayer;
use crate::RateLimitLayer;
use crate::error::raise_for_status;
use crate::event::Instrument;
use crate::request::ApiRequest;
use crate::request::ApiResponse;
use crate::retry::RetryConfig;
use crate::retry::RetryPolicy;

/// The composed, type-erased pipeline.
pub type BoxPipeline = BoxCloneSyncService<ApiRequest, ApiResponse, BoxError>;

/// Shared state and settings for every stage of one pipeline.
///
/// The gate and the limiter are shared by reference: two pipelines built from
/// clones of the same `Stages` share permits and tokens.
#[derive(Debug, Clone)]
pub struct Stages {
    pub instrument: Arc<dyn Instrument>,
    pub gate: ConcurrencyGate,
    pub limiter: Arc<dyn Strategy + Send + Sync>,
    pub soft_limit: f64,
    pub retry: RetryConfig,
}

/// Wraps `send` in the full stage order: instrumentation, concurrency, rate
/// limit, retry, status check.
pub fn pipeline<V>(stages: &Stages, send: V) -> BoxPipeline
where
    V: Service<ApiRequest, Response = ApiResponse, Error = BoxError> + Clone + Send + Sync + 'static,
    V::Future: Send + 'static,
{
    BoxCloneSyncService::new(
        ServiceBuilder::new()
            .instrumented(Arc::clone(&stages.instrument))
            .concurrency_gate(stages.gate.clone())
            .token_bucket(
                Arc::clone(&stages.limiter),
                stages.soft_limit,
                Arc::clone(&stages.instrument),
            )
            .retry_policy(stages.retry.clone())
            .map_result(raise_for_status)
            .service(send),
    )
}

/// Service Builder Extension adding the pipeline's stages to a tower::ServiceBuilder.
pub trait ServiceBuilderExt<L> {
    /// Add the request/response event layer
    fn instrumented(
        self,
        instrument: Arc<dyn Instrument>,
    ) -> ServiceBuilder<Stack<InstrumentLayer, L>>;

    /// Add a concurrency gate
    fn concurrency_gate(self, gate: ConcurrencyGate) -> ServiceBuilder<Stack<ConcurrencyLimitLayer, L>>;

    /// Add a token bucket with a soft limit
    fn token_bucket(
        self,
        limiter: Arc<dyn Strategy + Send + Sync + 'static>,
        soft_limit: f64,
        instrument: Arc<dyn Instrument>,
    ) -> ServiceBuilder<Stack<RateLimitLayer<dyn Strategy + Send + Sync + 'static>, L>>;

    /// Add status based retries
    fn retry_policy(self, config: RetryConfig) -> ServiceBuilder<Stack<RetryLayer<RetryPolicy>, L>>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn instrumented(
        self,
        instrument: Arc<dyn Instrument>,
    ) -> ServiceBuilder<Stack<InstrumentLayer, L>> {
        self.layer(InstrumentLayer::new(instrument))
    }

    fn concurrency_gate(self, gate: ConcurrencyGate) -> ServiceBuilder<Stack<ConcurrencyLimitLayer, L>> {
        self.layer(ConcurrencyLimitLayer::new(gate))
    }

    fn token_bucket(
        self,
        limiter: Arc<dyn Strategy + Send + Sync + 'static>,
        soft_limit: f64,
        instrument: Arc<dyn Instrument>,
    ) -> ServiceBuilder<Stack<RateLimitLayer<dyn Strategy + Send + Sync + 'static>, L>> {
        self.layer(
            RateLimitLayer::new(limiter)
                .with_soft_limit(soft_limit)
                .with_instrument(instrument),
        )
    }

    fn retry_policy(self, config: RetryConfig) -> ServiceBuilder<Stack<RetryLayer<RetryPolicy>, L>> {
        self.layer(RetryLayer::new(RetryPolicy::new(config)))
    }
}
