use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use http::StatusCode;
use serde_json::Value;
use tower::BoxError;
use tower::Service;

use crate::error::FrontError;
use crate::request::ApiRequest;
use crate::request::ApiResponse;

/// The innermost stage: performs the HTTP call and parses the body.
///
/// Headers common to every call (authorisation, user agent, content type) are
/// expected to be installed on the [`reqwest::Client`] as defaults.
#[derive(Debug, Clone)]
pub struct HttpSend {
    client: reqwest::Client,
}

impl HttpSend {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Service<ApiRequest> for HttpSend {
    type Response = ApiResponse;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<ApiResponse, BoxError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ApiRequest) -> Self::Future {
        let client = self.client.clone();

        Box::pin(async move {
            let mut builder = client.request(req.method, req.url);
            if let Some(body) = &req.body {
                builder = builder.json(body);
            }
            if let Some(timeout) = req.timeout {
                builder = builder.timeout(timeout);
            }

            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let bytes = response.bytes().await?;
            let body = parse_body(status, &bytes)?;

            Ok(ApiResponse {
                status,
                headers,
                body,
            })
        })
    }
}

/// Parses a response body into JSON with normalised keys.
///
/// An empty body is `null`. A body that is not JSON is kept as a string on error
/// statuses, so the error message can use it, and rejected on success statuses.
pub fn parse_body(status: StatusCode, bytes: &[u8]) -> Result<Value, FrontError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }

    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => Ok(normalize_keys(value)),
        Err(_) if status.as_u16() >= 400 => {
            Ok(Value::String(String::from_utf8_lossy(bytes).into_owned()))
        }
        Err(err) => Err(FrontError::Api {
            status: Some(status.as_u16()),
            message: format!("malformed response body: {err}"),
        }),
    }
}

/// Object keys whose values are maps owned by the user, such as contact custom
/// fields. Their keys are data and pass through verbatim.
const VERBATIM_MAPS: &[&str] = &["custom_fields"];

/// Rewrites camelCase object keys, at any depth, to snake_case.
///
/// Only identifier-like keys are touched. Keys inside the maps named in
/// [`VERBATIM_MAPS`] are left exactly as sent.
pub fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    let key = snake_case(&key);
                    let value = if VERBATIM_MAPS.contains(&key.as_str()) {
                        value
                    } else {
                        normalize_keys(value)
                    };
                    (key, value)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_keys).collect()),
        other => other,
    }
}

fn snake_case(key: &str) -> String {
    let identifier = key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !identifier || !key.chars().any(|c| c.is_ascii_uppercase()) {
        return key.to_owned();
    }

    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if !c.is_uppercase() {
            out.push(c);
            continue;
        }

        let prev = i.checked_sub(1).map(|j| chars[j]);
        let next = chars.get(i + 1).copied();
        // "fooBar" and "foo2Bar" split before the capital; "HTTPStatus" splits
        // before the last capital of the run.
        let boundary = match prev {
            Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
            Some(p) if p.is_uppercase() => next.is_some_and(char::is_lowercase),
            _ => false,
        };
        if boundary {
            out.push('_');
        }
        out.extend(c.to_lowercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn snake_case_handles_common_shapes() {
        assert_eq!(snake_case("created_at"), "created_at");
        assert_eq!(snake_case("createdAt"), "created_at");
        assert_eq!(snake_case("ContactBooks"), "contact_books");
        assert_eq!(snake_case("HTTPStatus"), "http_status");
        assert_eq!(snake_case("page2Token"), "page2_token");
        assert_eq!(snake_case("_links"), "_links");
        assert_eq!(snake_case("ID"), "id");
    }

    #[test]
    fn keys_are_normalised_at_every_depth() {
        let value = json!({
            "nextPage": {"untilToken": "1700000000"},
            "data": [{"createdAt": 1, "Body": "Hello World"}]
        });
        assert_eq!(
            normalize_keys(value),
            json!({
                "next_page": {"until_token": "1700000000"},
                "data": [{"created_at": 1, "body": "Hello World"}]
            })
        );
    }

    #[test]
    fn custom_field_names_are_left_alone() {
        let body = json!({
            "id": "crd_1",
            "custom_fields": {"Account ID": "42", "VIP": true, "renewalDate": "2025-01-01"},
        });
        assert_eq!(normalize_keys(body.clone()), body);

        let body = json!({
            "contactCount": 1,
            "customFields": {"renewalDate": "2025-01-01"},
        });
        assert_eq!(
            normalize_keys(body),
            json!({
                "contact_count": 1,
                "custom_fields": {"renewalDate": "2025-01-01"},
            })
        );
    }

    #[test]
    fn keys_that_are_not_identifiers_are_kept() {
        assert_eq!(snake_case("Account ID"), "Account ID");
        assert_eq!(snake_case("x-Request-Id"), "x-Request-Id");
    }

    #[test]
    fn empty_body_is_null() {
        assert_eq!(parse_body(StatusCode::NO_CONTENT, b"").unwrap(), Value::Null);
        assert_eq!(parse_body(StatusCode::OK, b" \n").unwrap(), Value::Null);
    }

    #[test]
    fn non_json_error_body_is_kept_as_text() {
        let body = parse_body(StatusCode::BAD_GATEWAY, b"<html>bad gateway</html>").unwrap();
        assert_eq!(body, json!("<html>bad gateway</html>"));
    }

    #[test]
    fn non_json_success_body_is_rejected() {
        let err = parse_body(StatusCode::OK, b"not json").unwrap_err();
        assert_eq!(err.status(), Some(200));
        assert!(err.message().starts_with("malformed response body"));
    }
}
