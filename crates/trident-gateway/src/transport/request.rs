use std::path::Path;
use std::time::Duration;

use http::Method;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use trident_config::{ProxyConfig, ProxyKind};

/// Request payload
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Text(String),
    /// Serialized to a string before it goes on the wire
    Json(Value),
}

impl RequestBody {
    fn to_wire(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(text) => text.clone(),
            Self::Json(value) => value.to_string(),
        }
    }
}

/// One HTTP-shaped exchange to run through the transport
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: IndexMap<String, String>,
    pub body: RequestBody,
    /// Bounds the time until response headers arrive
    pub timeout: Option<Duration>,
    /// Overrides the transport's configured proxy
    pub proxy: Option<ProxyConfig>,
    /// Gunzip a `content-encoding: gzip` body; streaming calls never do
    pub decompress: bool,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: IndexMap::new(),
            body: RequestBody::Empty,
            timeout: None,
            proxy: None,
            decompress: true,
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// -- Wire format written to the subprocess --

#[derive(Serialize)]
struct WireRequest<'a> {
    method: String,
    url: &'a str,
    headers: &'a IndexMap<String, String>,
    body: String,
    config_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<WireTimeout>,
    #[serde(skip_serializing_if = "Option::is_none")]
    proxy: Option<WireProxy<'a>>,
}

#[derive(Serialize)]
struct WireTimeout {
    connect: u64,
    read: u64,
}

#[derive(Serialize)]
struct WireProxy<'a> {
    enabled: bool,
    #[serde(rename = "type")]
    kind: &'static str,
    url: &'a str,
}

const fn proxy_kind(kind: ProxyKind) -> &'static str {
    match kind {
        ProxyKind::Http => "http",
        ProxyKind::Socks5 => "socks5",
    }
}

/// Serialize a request into the single JSON document the subprocess reads
pub fn wire_request(
    request: &TransportRequest,
    config_path: Option<&Path>,
    default_proxy: Option<&ProxyConfig>,
) -> Result<Vec<u8>, serde_json::Error> {
    let proxy = request.proxy.as_ref().or(default_proxy).map(|proxy| WireProxy {
        enabled: proxy.enabled,
        kind: proxy_kind(proxy.kind),
        url: &proxy.url,
    });

    let timeout = request.timeout.map(|timeout| {
        let seconds = timeout.as_secs().max(1);
        WireTimeout {
            connect: seconds,
            read: seconds,
        }
    });

    serde_json::to_vec(&WireRequest {
        method: request.method.as_str().to_uppercase(),
        url: &request.url,
        headers: &request.headers,
        body: request.body.to_wire(),
        config_path: config_path.map(|path| path.display().to_string()),
        timeout,
        proxy,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn wire_shape() {
        let request = TransportRequest::new(Method::POST, "https://upstream.test/v1internal:generateContent")
            .header("Authorization", "Bearer t")
            .json(json!({"a": 1}))
            .timeout(Duration::from_secs(30));

        let wire: Value =
            serde_json::from_slice(&wire_request(&request, Some(Path::new("/etc/tls.json")), None).unwrap()).unwrap();

        assert_eq!(
            wire,
            json!({
                "method": "POST",
                "url": "https://upstream.test/v1internal:generateContent",
                "headers": {"Authorization": "Bearer t"},
                "body": "{\"a\":1}",
                "config_path": "/etc/tls.json",
                "timeout": {"connect": 30, "read": 30}
            })
        );
    }

    #[test]
    fn proxy_falls_back_to_transport_default() {
        let default_proxy = ProxyConfig {
            enabled: true,
            kind: ProxyKind::Socks5,
            url: "socks5://127.0.0.1:1080".to_owned(),
        };
        let request = TransportRequest::new(Method::GET, "https://upstream.test/");

        let wire: Value = serde_json::from_slice(&wire_request(&request, None, Some(&default_proxy)).unwrap()).unwrap();

        assert_eq!(wire["method"], "GET");
        assert_eq!(wire["body"], "");
        assert_eq!(wire["config_path"], Value::Null);
        assert!(wire.get("timeout").is_none());
        assert_eq!(
            wire["proxy"],
            json!({"enabled": true, "type": "socks5", "url": "socks5://127.0.0.1:1080"})
        );
    }
}
