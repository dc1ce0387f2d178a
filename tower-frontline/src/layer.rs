use std::sync::Arc;

use frontline_limit::Strategy;
use tower::Layer;

use crate::event::Instrument;
use crate::event::TracingInstrument;
use crate::service::RateLimitService;

/// Tokens left at or below which `rate_limit.hit` is emitted.
pub const DEFAULT_SOFT_LIMIT: f64 = 30.0;

/// Applies a shared rate-limit [`Strategy`] to requests.
#[derive(Debug)]
pub struct RateLimitLayer<L>
where
    L: ?Sized,
{
    limiter: Arc<L>,
    soft_limit: f64,
    instrument: Arc<dyn Instrument>,
}

impl<L> Clone for RateLimitLayer<L>
where
    L: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            soft_limit: self.soft_limit,
            instrument: Arc::clone(&self.instrument),
        }
    }
}

impl<L> RateLimitLayer<L>
where
    L: Strategy + ?Sized,
{
    /// Create a RateLimitLayer
    pub fn new(limiter: Arc<L>) -> Self {
        RateLimitLayer {
            limiter,
            soft_limit: DEFAULT_SOFT_LIMIT,
            instrument: Arc::new(TracingInstrument),
        }
    }

    /// Set the soft limit.
    ///
    /// Whenever an admission leaves this many tokens or fewer, a
    /// `rate_limit.hit` event is emitted. It never blocks the request.
    pub fn with_soft_limit(mut self, soft_limit: f64) -> Self {
        self.soft_limit = soft_limit;
        self
    }

    /// Set where `rate_limit.hit` events go.
    pub fn with_instrument(mut self, instrument: Arc<dyn Instrument>) -> Self {
        self.instrument = instrument;
        self
    }
}

impl<L, S> Layer<S> for RateLimitLayer<L>
where
    L: ?Sized,
{
    type Service = RateLimitService<L, S>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService::new(service, self.limiter.clone())
            .with_soft_limit(self.soft_limit)
            .with_instrument(self.instrument.clone())
    }
}
