use std::sync::Arc;
use std::time::Duration;

use http::Method;
use tokio::time::Sleep;
use tokio::time::sleep;
use tower::BoxError;
use tower::retry::Policy;
use tracing::warn;

use crate::error::FrontError;
use crate::request::ApiRequest;
use crate::request::ApiResponse;

/// When and how often the pipeline re-sends a failed call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts in total, the first one included.
    pub max_attempts: usize,
    /// Delay before the first retry.
    pub interval: Duration,
    /// Each further delay is the previous one times this factor.
    pub backoff_factor: f64,
    pub statuses: Vec<u16>,
    pub methods: Vec<Method>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_millis(300),
            backoff_factor: 3.0,
            statuses: vec![429, 500, 502, 503, 504],
            methods: vec![Method::GET, Method::POST, Method::PATCH, Method::DELETE],
        }
    }
}

impl RetryConfig {
    pub fn retries(&self, method: &Method, status: u16) -> bool {
        self.methods.contains(method) && self.statuses.contains(&status)
    }

    /// The delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: usize) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as usize) as i32;
        let nanos = self.interval.as_nanos() as f64 * self.backoff_factor.max(0.0).powi(exponent);
        // `as u64` saturates.
        Duration::from_nanos(nanos.round() as u64)
    }
}

/// A [`tower::retry::Policy`] driven by a [`RetryConfig`].
///
/// Tower clones the policy for every call, so the attempt counter is per call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: Arc<RetryConfig>,
    attempts: usize,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config: Arc::new(config),
            attempts: 1,
        }
    }
}

impl Policy<ApiRequest, ApiResponse, BoxError> for RetryPolicy {
    type Future = Sleep;

    fn retry(
        &mut self,
        req: &mut ApiRequest,
        result: &mut Result<ApiResponse, BoxError>,
    ) -> Option<Self::Future> {
        if self.attempts >= self.config.max_attempts {
            return None;
        }
        let status = match result {
            Ok(response) => {
                let status = response.status.as_u16();
                if !self.config.retries(&req.method, status) {
                    return None;
                }
                status
            }
            Err(err) => {
                let err = err.downcast_ref::<FrontError>()?;
                if !self.config.methods.contains(&req.method)
                    || !err.is_retryable_status(&self.config.statuses)
                {
                    return None;
                }
                err.status()?
            }
        };

        let delay = self.config.delay_for(self.attempts);
        self.attempts += 1;
        warn!(
            attempt = self.attempts,
            max_attempts = self.config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            status,
            method = %req.method,
            path = %req.path,
            "retrying request"
        );
        Some(sleep(delay))
    }

    fn clone_request(&mut self, req: &ApiRequest) -> Option<ApiRequest> {
        Some(req.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backoff_is_geometric() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for(1), Duration::from_millis(300));
        assert_eq!(config.delay_for(2), Duration::from_millis(900));
        assert_eq!(config.delay_for(3), Duration::from_millis(2700));
    }

    #[test]
    fn only_configured_methods_and_statuses_retry() {
        let config = RetryConfig::default();
        assert!(config.retries(&Method::GET, 503));
        assert!(config.retries(&Method::DELETE, 429));
        assert!(!config.retries(&Method::PUT, 503));
        assert!(!config.retries(&Method::GET, 501));
        assert!(!config.retries(&Method::GET, 404));
    }

    fn server_error(status: u16) -> Result<ApiResponse, BoxError> {
        Err(Box::new(FrontError::Server {
            status,
            message: "boom".into(),
        }))
    }

    #[tokio::test]
    async fn policy_retries_typed_errors_until_attempts_run_out() {
        let url = reqwest::Url::parse("https://api.test/contacts").unwrap();
        let mut get = ApiRequest::new(Method::GET, "contacts", url.clone());
        let mut put = ApiRequest::new(Method::PUT, "contacts", url);

        let mut policy = RetryPolicy::new(RetryConfig::default());
        assert!(policy.retry(&mut get, &mut server_error(501)).is_none());
        assert!(policy.clone().retry(&mut put, &mut server_error(503)).is_none());

        assert!(policy.retry(&mut get, &mut server_error(503)).is_some());
        assert!(policy.retry(&mut get, &mut server_error(502)).is_some());
        assert!(policy.retry(&mut get, &mut server_error(503)).is_none());
    }
}
