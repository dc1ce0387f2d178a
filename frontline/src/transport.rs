use std::fmt;
use std::sync::Arc;

use frontline_limit::ConcurrencyGate;
use frontline_limit::TokenBucket;
use http::HeaderMap;
use http::HeaderValue;
use http::Method;
use http::header::ACCEPT;
use http::header::AUTHORIZATION;
use http::header::CONTENT_TYPE;
use reqwest::Url;
use serde_json::Value;
use tokio::sync::OnceCell;
use tower::ServiceExt;
use tower_frontline::ApiRequest;
use tower_frontline::BoxPipeline;
use tower_frontline::FrontError;
use tower_frontline::HttpSend;
use tower_frontline::Stages;
use tower_frontline::pipeline;
use tracing::debug;

use crate::config::Config;
use crate::params::Params;

/// One authenticated connection to the API.
///
/// A transport owns its HTTP client, concurrency gate and token bucket. They
/// are shared by every caller of this transport and by nothing else.
pub struct Transport {
    token: String,
    config: Arc<Config>,
    limiter: Arc<TokenBucket>,
    stages: Stages,
    connection: OnceCell<BoxPipeline>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("base_url", &self.config.base_url.as_str())
            .field("gate", &self.stages.gate)
            .field("limiter", &self.limiter)
            .field("connected", &self.connection.initialized())
            .finish_non_exhaustive()
    }
}

impl Transport {
    pub fn new(token: impl Into<String>, config: Arc<Config>) -> Self {
        let limiter = Arc::new(TokenBucket::new(
            config.rate_limit.capacity,
            config.rate_limit.window,
        ));
        let stages = Stages {
            instrument: Arc::clone(&config.instrument),
            gate: ConcurrencyGate::new(config.concurrency),
            limiter: limiter.clone(),
            soft_limit: config.rate_limit.soft_limit,
            retry: config.retry.clone(),
        };

        Self {
            token: token.into(),
            config,
            limiter,
            stages,
            connection: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.stages.gate
    }

    pub fn limiter(&self) -> &TokenBucket {
        &self.limiter
    }

    /// Sends one request through the pipeline and returns the parsed body.
    ///
    /// `path` is relative to the configured base url; a single leading `/` is
    /// ignored. Every failure comes back as a [`FrontError`].
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: &Params,
        body: Option<Value>,
    ) -> Result<Value, FrontError> {
        let path = normalize_path(path);
        let url = self.resolve_url(path, params)?;
        let request = ApiRequest::new(method, path, url)
            .with_body(body)
            .with_timeout(self.config.timeout);

        let connection = self.connection().await?.clone();
        connection
            .oneshot(request)
            .await
            .map(|response| response.body)
            .map_err(FrontError::from_boxed)
    }

    pub async fn get(&self, path: &str, params: &Params) -> Result<Value, FrontError> {
        self.request(Method::GET, path, params, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value, FrontError> {
        self.request(Method::POST, path, &Params::new(), Some(body)).await
    }

    pub async fn patch(&self, path: &str, body: Value) -> Result<Value, FrontError> {
        self.request(Method::PATCH, path, &Params::new(), Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, FrontError> {
        self.request(Method::DELETE, path, &Params::new(), None).await
    }

    /// The full url a request for `path` with `params` goes to.
    pub fn resolve_url(&self, path: &str, params: &Params) -> Result<Url, FrontError> {
        let mut url = self
            .config
            .base_url
            .join(normalize_path(path))
            .map_err(|err| FrontError::Api {
                status: None,
                message: format!("invalid request path {path:?}: {err}"),
            })?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }
        Ok(url)
    }

    /// Built once, on first use. Concurrent first callers wait for the same build.
    async fn connection(&self) -> Result<&BoxPipeline, FrontError> {
        self.connection
            .get_or_try_init(|| async { self.connect() })
            .await
    }

    fn connect(&self) -> Result<BoxPipeline, FrontError> {
        let mut authorization = HeaderValue::try_from(format!("Bearer {}", self.token))
            .map_err(|err| FrontError::Api {
                status: None,
                message: format!("invalid api token: {err}"),
            })?;
        authorization.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(self.config.user_agent.as_str())
            .build()
            .map_err(|err| FrontError::from_boxed(err.into()))?;

        debug!(
            base_url = %self.config.base_url,
            concurrency = self.stages.gate.max_permits(),
            capacity = self.limiter.capacity(),
            window_secs = self.limiter.window().as_secs_f64(),
            "building request pipeline"
        );
        Ok(pipeline(&self.stages, HttpSend::new(client)))
    }
}

/// Strips a single leading `/` so the path joins beneath the base url.
pub(crate) fn normalize_path(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}
