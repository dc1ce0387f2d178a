use std::time::Duration;

use serde_json::Value;
use tower::BoxError;

use crate::request::ApiResponse;
use crate::request::RetryAfter;

/// The error categories a failed call can fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Authentication,
    NotFound,
    RateLimit,
    Server,
    Other,
}

/// Maps an HTTP status to an [`ErrorKind`].
///
/// Total over all `u16` values. A success status passed in by mistake maps to
/// [`ErrorKind::Other`].
pub fn classify(status: u16, _body: &Value) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::Authentication,
        404 => ErrorKind::NotFound,
        429 => ErrorKind::RateLimit,
        500..=599 => ErrorKind::Server,
        _ => ErrorKind::Other,
    }
}

/// Extracts a human readable message from an error body.
///
/// A string body is used verbatim. Otherwise the `error` field is used, then the
/// `_error` envelope the service wraps most failures in, and finally
/// `"HTTP {status}"`.
pub fn error_message(status: u16, body: &Value) -> String {
    let found = match body {
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => ["error", "_error"]
            .iter()
            .find_map(|key| map.get(*key).and_then(field_message)),
        _ => None,
    };
    found.unwrap_or_else(|| format!("HTTP {status}"))
}

fn field_message(field: &Value) -> Option<String> {
    match field {
        Value::String(text) => Some(text.clone()),
        Value::Object(inner) => inner
            .get("message")
            .or_else(|| inner.get("title"))
            .and_then(Value::as_str)
            .map(str::to_owned),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Errors returned by the `frontline` request pipeline.
///
/// Every failure a caller sees is one of these variants. Lower level failures
/// (connection refused, timeouts, closed gates) are folded into [`FrontError::Api`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrontError {
    /// The token was rejected (401) or lacks permission (403).
    #[error("authentication failed (HTTP {status}): {message}")]
    Authentication { status: u16, message: String },

    /// The resource does not exist (404).
    #[error("resource not found: {message}")]
    NotFound { message: String },

    /// The service asked us to slow down (429).
    #[error("rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        /// Server supplied `Retry-After`, when present.
        retry_after: Option<Duration>,
    },

    /// The service failed (5xx).
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// Anything else: other statuses, malformed bodies, transport failures.
    #[error("{message}")]
    Api { status: Option<u16>, message: String },
}

impl FrontError {
    /// Builds the typed error for an error response.
    pub fn from_status(status: u16, body: &Value, retry_after: Option<Duration>) -> Self {
        let message = error_message(status, body);
        match classify(status, body) {
            ErrorKind::Authentication => Self::Authentication { status, message },
            ErrorKind::NotFound => Self::NotFound { message },
            ErrorKind::RateLimit => Self::RateLimited {
                message,
                retry_after,
            },
            ErrorKind::Server => Self::Server { status, message },
            ErrorKind::Other => Self::Api {
                status: Some(status),
                message,
            },
        }
    }

    /// Recovers a typed error from whatever the tower stack produced.
    pub fn from_boxed(err: BoxError) -> Self {
        let err = match err.downcast::<FrontError>() {
            Ok(front) => return *front,
            Err(err) => err,
        };
        match err.downcast::<reqwest::Error>() {
            Ok(transport) => Self::from_transport(&transport),
            Err(other) => Self::Api {
                status: None,
                message: other.to_string(),
            },
        }
    }

    fn from_transport(err: &reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::from_status(status.as_u16(), &Value::String(err.to_string()), None),
            None => Self::Api {
                status: None,
                message: format!("transport error: {err}"),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::Server { .. } => ErrorKind::Server,
            Self::Api { .. } => ErrorKind::Other,
        }
    }

    /// The HTTP status behind this error, if there was a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { status, .. } | Self::Server { status, .. } => Some(*status),
            Self::NotFound { .. } => Some(404),
            Self::RateLimited { .. } => Some(429),
            Self::Api { status, .. } => *status,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Authentication { message, .. }
            | Self::NotFound { message }
            | Self::RateLimited { message, .. }
            | Self::Server { message, .. }
            | Self::Api { message, .. } => message,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// True when this error came from a response whose status is in `statuses`.
    pub fn is_retryable_status(&self, statuses: &[u16]) -> bool {
        self.status().is_some_and(|status| statuses.contains(&status))
    }
}

/// Fails responses with a status of 400 or above.
///
/// This is the response-inspecting stage of the pipeline. It sits inside the
/// retry stage so retries see typed errors.
pub fn raise_for_status(
    result: Result<ApiResponse, BoxError>,
) -> Result<ApiResponse, BoxError> {
    let response = result?;
    let status = response.status.as_u16();
    if status < 400 {
        return Ok(response);
    }
    Err(Box::new(FrontError::from_status(
        status,
        &response.body,
        response.retry_after(),
    )))
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use serde_json::json;

    use super::*;

    #[test]
    fn classification_is_exact() {
        let body = Value::Null;
        assert_eq!(classify(401, &body), ErrorKind::Authentication);
        assert_eq!(classify(403, &body), ErrorKind::Authentication);
        assert_eq!(classify(404, &body), ErrorKind::NotFound);
        assert_eq!(classify(429, &body), ErrorKind::RateLimit);
        assert_eq!(classify(500, &body), ErrorKind::Server);
        assert_eq!(classify(599, &body), ErrorKind::Server);
        assert_eq!(classify(200, &body), ErrorKind::Other);
        assert_eq!(classify(400, &body), ErrorKind::Other);
        assert_eq!(classify(600, &body), ErrorKind::Other);
        assert_eq!(classify(0, &body), ErrorKind::Other);
    }

    #[test]
    fn message_prefers_string_body() {
        let body = json!("upstream exploded");
        assert_eq!(error_message(502, &body), "upstream exploded");
    }

    #[test]
    fn message_reads_error_field() {
        assert_eq!(error_message(400, &json!({"error": "bad input"})), "bad input");
        assert_eq!(
            error_message(404, &json!({"_error": {"status": 404, "title": "Not found", "message": "no such contact"}})),
            "no such contact"
        );
        assert_eq!(
            error_message(409, &json!({"_error": {"title": "Conflict"}})),
            "Conflict"
        );
    }

    #[test]
    fn message_falls_back_to_status() {
        assert_eq!(error_message(418, &json!({"detail": "teapot"})), "HTTP 418");
        assert_eq!(error_message(500, &Value::Null), "HTTP 500");
        assert_eq!(error_message(500, &json!({"error": null})), "HTTP 500");
    }

    #[test]
    fn typed_errors_carry_status() {
        let err = FrontError::from_status(403, &json!({"error": "forbidden"}), None);
        assert_eq!(
            err,
            FrontError::Authentication {
                status: 403,
                message: "forbidden".into()
            }
        );
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(err.status(), Some(403));

        let err = FrontError::from_status(429, &Value::Null, Some(Duration::from_secs(2)));
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));

        let err = FrontError::from_status(503, &Value::Null, None);
        assert_eq!(err.to_string(), "server error (HTTP 503): HTTP 503");
        assert!(err.is_retryable_status(&[429, 503]));
        assert!(!err.is_retryable_status(&[500]));
    }

    #[test]
    fn boxed_errors_round_trip() {
        let boxed: BoxError = Box::new(FrontError::NotFound {
            message: "gone".into(),
        });
        assert_eq!(
            FrontError::from_boxed(boxed),
            FrontError::NotFound {
                message: "gone".into()
            }
        );

        let boxed: BoxError = Box::new(frontline_limit::GateClosed);
        let err = FrontError::from_boxed(boxed);
        assert_eq!(err.kind(), ErrorKind::Other);
        assert_eq!(err.status(), None);
        assert_eq!(err.message(), "concurrency gate is closed");
    }

    #[test]
    fn raise_passes_success_through() {
        let response = ApiResponse::new(StatusCode::OK, json!({"ok": true}));
        let result = raise_for_status(Ok(response)).unwrap();
        assert_eq!(result.body, json!({"ok": true}));
    }

    #[test]
    fn raise_types_error_responses() {
        let response = ApiResponse::new(StatusCode::NOT_FOUND, json!({"error": "missing"}));
        let err = raise_for_status(Ok(response)).unwrap_err();
        let front = err.downcast_ref::<FrontError>().unwrap();
        assert_eq!(front.kind(), ErrorKind::NotFound);
        assert_eq!(front.message(), "missing");
    }
}
