use std::sync::Arc;

use serde_json::Value;
use tower_frontline::FrontError;

use crate::config::Config;
use crate::paginator::Paginator;
use crate::params::Params;
use crate::transport::Transport;

/// Entry point for talking to the API with one token.
///
/// Clones share the same [`Transport`], and with it the same connection,
/// concurrency gate and token bucket.
#[derive(Debug, Clone)]
pub struct Client {
    transport: Arc<Transport>,
}

impl Client {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_config(token, Config::default())
    }

    pub fn with_config(token: impl Into<String>, config: Config) -> Self {
        Self {
            transport: Arc::new(Transport::new(token, Arc::new(config))),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn paginator(&self) -> Paginator<'_> {
        Paginator::new(&self.transport)
    }

    pub async fn get(&self, path: &str, params: &Params) -> Result<Value, FrontError> {
        self.transport.get(path, params).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value, FrontError> {
        self.transport.post(path, body).await
    }

    pub async fn patch(&self, path: &str, body: Value) -> Result<Value, FrontError> {
        self.transport.patch(path, body).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, FrontError> {
        self.transport.delete(path).await
    }
}
