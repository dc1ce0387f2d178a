use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;
use tower_frontline::DEFAULT_SOFT_LIMIT;
use tower_frontline::Instrument;
use tower_frontline::RetryConfig;
use tower_frontline::TracingInstrument;

pub const DEFAULT_BASE_URL: &str = "https://api2.frontapp.com/";
pub const DEFAULT_CONCURRENCY: NonZeroUsize = NonZeroUsize::new(5).unwrap();
pub const DEFAULT_CAPACITY: NonZeroUsize = NonZeroUsize::new(300).unwrap();
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid base url {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

/// Token bucket settings: `capacity` requests per `window`.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub capacity: NonZeroUsize,
    pub window: Duration,
    /// Tokens left at or below which `rate_limit.hit` is emitted.
    pub soft_limit: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            window: DEFAULT_WINDOW,
            soft_limit: DEFAULT_SOFT_LIMIT,
        }
    }
}

/// Everything a [`Transport`](crate::Transport) reads.
///
/// A `Config` is handed to each transport explicitly. Nothing here is global:
/// two transports built from the same `Config` still get their own gates.
#[derive(Debug, Clone)]
pub struct Config {
    /// Always ends in `/`, so relative paths join beneath it.
    pub base_url: Url,
    /// Per request timeout applied to the send.
    pub timeout: Option<Duration>,
    pub user_agent: String,
    /// Maximum requests in flight at once.
    pub concurrency: NonZeroUsize,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub instrument: Arc<dyn Instrument>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout: None,
            user_agent: format!("frontline/{}", env!("CARGO_PKG_VERSION")),
            concurrency: DEFAULT_CONCURRENCY,
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            instrument: Arc::new(TracingInstrument),
        }
    }
}

fn default_base_url() -> Url {
    // A literal known to parse.
    Url::parse(DEFAULT_BASE_URL).expect("default base url is valid")
}

impl Config {
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason,
        };

        let mut raw = base_url.to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw).map_err(|err| invalid(err.to_string()))?;
        if url.cannot_be_a_base() {
            return Err(invalid("not a hierarchical url".to_string()));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("must not carry a query or fragment".to_string()));
        }

        self.base_url = url;
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: NonZeroUsize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Send pipeline and paginator events somewhere other than `tracing`.
    pub fn with_instrument(mut self, instrument: Arc<dyn Instrument>) -> Self {
        self.instrument = instrument;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.base_url.as_str(), "https://api2.frontapp.com/");
        assert_eq!(config.concurrency.get(), 5);
        assert_eq!(config.rate_limit.capacity.get(), 300);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
        assert_eq!(config.rate_limit.soft_limit, 30.0);
        assert_eq!(config.retry, RetryConfig::default());
        assert!(config.user_agent.starts_with("frontline/"));
        assert_eq!(config.timeout, None);
    }

    #[test]
    fn base_url_gains_trailing_slash() {
        let config = Config::default()
            .with_base_url("http://localhost:8080/api")
            .unwrap();
        assert_eq!(config.base_url.as_str(), "http://localhost:8080/api/");
        assert_eq!(
            config.base_url.join("contacts").unwrap().as_str(),
            "http://localhost:8080/api/contacts"
        );
    }

    #[test]
    fn bad_base_urls_are_rejected() {
        let err = Config::default().with_base_url("not a url").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBaseUrl { .. }));

        let err = Config::default()
            .with_base_url("mailto:team@example.com")
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidBaseUrl {
                url: "mailto:team@example.com".into(),
                reason: "not a hierarchical url".into(),
            }
        );

        assert!(Config::default().with_base_url("https://api.test/?x=1").is_err());
    }
}
