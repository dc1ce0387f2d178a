//! # Tower Frontline
//!
//! `tower-frontline` holds the stages of the `frontline` request pipeline as
//! [Tower](https://github.com/tower-rs/tower) layers. Each stage wraps a single
//! "send" service, and [`pipeline`] composes them in a fixed order:
//!
//! 1. **Instrumentation** ([`InstrumentLayer`]): emits `request` before the call
//!    and `response` once it settles, including when it fails or is dropped.
//! 2. **Concurrency** ([`ConcurrencyLimitLayer`]): holds a permit from a shared
//!    [`frontline_limit::ConcurrencyGate`] for the life of the call.
//! 3. **Rate limit** ([`RateLimitLayer`]): takes a token from a shared
//!    [`frontline_limit::Strategy`], waiting if it has to, and honours
//!    server-sent `Retry-After`.
//! 4. **Retry** ([`RetryPolicy`]): re-sends on retryable statuses with
//!    geometric backoff.
//! 5. **Status check** ([`raise_for_status`]): turns 4xx/5xx responses into a
//!    typed [`FrontError`].
//! 6. **Send** ([`HttpSend`]): the reqwest call and JSON parsing.
//!
//! Every stage speaks [`tower::BoxError`]. [`FrontError::from_boxed`] turns
//! whatever comes out of the stack back into the typed taxonomy.

mod concurrency_layer;
mod error;
mod event;
mod instrument_layer;
mod layer;
mod request;
mod retry;
mod send;
mod service;
mod utils;


pub use concurrency_layer::ConcurrencyLimitLayer;
pub use concurrency_layer::ConcurrencyLimitService;
pub use error::ErrorKind;
pub use error::FrontError;
pub use error::classify;
pub use error::error_message;
pub use error::raise_for_status;
pub use event::Event;
pub use event::Instrument;
pub use event::RecordingInstrument;
pub use event::TracingInstrument;
pub use instrument_layer::InstrumentLayer;
pub use instrument_layer::InstrumentService;
pub use layer::DEFAULT_SOFT_LIMIT;
pub use layer::RateLimitLayer;
pub use request::ApiRequest;
pub use request::ApiResponse;
pub use request::RetryAfter;
pub use retry::RetryConfig;
pub use retry::RetryPolicy;
pub use send::HttpSend;
pub use send::normalize_keys;
pub use send::parse_body;
pub use service::RateLimitService;
pub use tower::BoxError;
pub use utils::BoxPipeline;
pub use utils::ServiceBuilderExt;
pub use utils::Stages;
pub use utils::pipeline;
