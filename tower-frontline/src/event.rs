use std::fmt::Debug;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use http::Method;
use tracing::debug;
use tracing::warn;

/// Observability events emitted by the pipeline and the paginator.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// About to send.
    Request {
        method: Method,
        path: String,
        url: String,
    },
    /// The call settled. `status` is absent when no response was received.
    Response {
        method: Method,
        path: String,
        url: String,
        status: Option<u16>,
        duration: Duration,
    },
    /// The token bucket is at or below its soft limit.
    RateLimitHit {
        remaining_tokens: f64,
        threshold: f64,
    },
    /// The paginator is about to fetch a page.
    Page { page_number: usize, url: String },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Response { .. } => "response",
            Self::RateLimitHit { .. } => "rate_limit.hit",
            Self::Page { .. } => "paginator.page",
        }
    }
}

/// A sink for [`Event`]s. Held by reference in the client configuration.
pub trait Instrument: Send + Sync + Debug {
    fn emit(&self, event: &Event);
}

/// Forwards events to `tracing`. This is the default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingInstrument;

impl Instrument for TracingInstrument {
    fn emit(&self, event: &Event) {
        match event {
            Event::Request { method, path, url } => {
                debug!(event = event.name(), %method, path, url, "sending request");
            }
            Event::Response {
                method,
                path,
                url,
                status,
                duration,
            } => {
                let duration_ms = duration.as_millis() as u64;
                if status.is_none_or(|status| status >= 400) {
                    warn!(event = event.name(), %method, path, url, ?status, duration_ms, "request failed");
                } else {
                    debug!(event = event.name(), %method, path, url, ?status, duration_ms, "request completed");
                }
            }
            Event::RateLimitHit {
                remaining_tokens,
                threshold,
            } => {
                warn!(event = event.name(), remaining_tokens, threshold, "rate limit soft threshold reached");
            }
            Event::Page { page_number, url } => {
                debug!(event = event.name(), page_number, url, "fetching page");
            }
        }
    }
}

/// Keeps every event in memory, in emission order. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingInstrument {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingInstrument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Event names, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(Event::name).collect()
    }
}

impl Instrument for RecordingInstrument {
    fn emit(&self, event: &Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
