use std::sync::Arc;

use axum::Json;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

/// Key presented by the client, in any of the headers the three protocols use
fn presented_key(headers: &HeaderMap) -> Option<&str> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    header(http::header::AUTHORIZATION.as_str())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| header("x-api-key"))
        .or_else(|| header("x-goog-api-key"))
}

/// Reject requests that do not carry the configured API key
///
/// Accepts `Authorization: Bearer`, `x-api-key` and `x-goog-api-key`.
/// Paths starting with an entry of `public_paths` are let through.
pub async fn auth_middleware(
    api_key: Arc<SecretString>,
    public_paths: Arc<[String]>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if public_paths.iter().any(|p| path.starts_with(p.as_str())) {
        return next.run(request).await;
    }

    let presented = presented_key(request.headers());
    if presented.is_some_and(|key| key == api_key.expose_secret()) {
        return next.run(request).await;
    }

    tracing::warn!(path, key_present = presented.is_some(), "rejected client request");
    let body = json!({
        "error": {
            "message": "invalid API key",
            "type": "authentication_error",
        }
    });
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    fn headers(name: &'static str, value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn accepts_each_protocol_header() {
        assert_eq!(presented_key(&headers("authorization", "Bearer k1")), Some("k1"));
        assert_eq!(presented_key(&headers("x-api-key", "k2")), Some("k2"));
        assert_eq!(presented_key(&headers("x-goog-api-key", "k3")), Some("k3"));
    }

    #[test]
    fn non_bearer_authorization_is_ignored() {
        assert_eq!(presented_key(&headers("authorization", "Basic abc")), None);
        assert_eq!(presented_key(&HeaderMap::new()), None);
    }
}
