//! Calls to the `v1internal` upstream endpoints

use std::sync::Arc;
use std::time::Duration;

use http::Method;
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use trident_config::UpstreamConfig;

use crate::collab::AccessToken;
use crate::error::GatewayError;
use crate::transport::{HttpTransport, StreamingResponse, TransportRequest, TransportResponse, decode_body};

pub const GENERATE_ENDPOINT: &str = "v1internal:generateContent";
pub const STREAM_ENDPOINT: &str = "v1internal:streamGenerateContent?alt=sse";
pub const MODELS_ENDPOINT: &str = "v1internal:fetchAvailableModels";

/// Text in a 403 body that means the prompt is too large, not that the
/// account lost access
pub const CONTEXT_TOO_LARGE_MARKER: &str = "The caller does not";

/// Map a non-success upstream answer to an error
///
/// A 403 is either a context-window overflow (recognized by
/// [`CONTEXT_TOO_LARGE_MARKER`]) or a revoked account.
pub fn check_status(response: TransportResponse) -> Result<TransportResponse, GatewayError> {
    if response.is_success() {
        return Ok(response);
    }

    if response.status == 403 {
        let body = response.text();
        return Err(if body.contains(CONTEXT_TOO_LARGE_MARKER) {
            GatewayError::ContextTooLarge { body }
        } else {
            GatewayError::AccountDisabled { body }
        });
    }

    let response = response.error_for_status()?;
    Err(GatewayError::Upstream {
        status: response.status,
        body: response.text(),
    })
}

/// Builds and sends upstream requests
pub struct UpstreamClient {
    transport: Arc<dyn HttpTransport>,
    config: UpstreamConfig,
}

impl UpstreamClient {
    pub fn new(transport: Arc<dyn HttpTransport>, config: UpstreamConfig) -> Self {
        Self { transport, config }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.as_str().trim_end_matches('/'))
    }

    fn request(&self, path: &str, token: &AccessToken, body: Value) -> TransportRequest {
        TransportRequest::new(Method::POST, self.endpoint(path))
            .header("Authorization", format!("Bearer {}", token.access_token.expose_secret()))
            .header("Host", self.config.host.clone())
            .header("User-Agent", self.config.user_agent.clone())
            .header("Content-Type", "application/json")
            .header("Accept-Encoding", "gzip")
            .json(body)
            .timeout(Duration::from_secs(self.config.timeout_seconds))
    }

    /// Non-streaming generation; returns the raw response body
    pub async fn generate(
        &self,
        token: &AccessToken,
        body: Value,
        cancel: CancellationToken,
    ) -> Result<String, GatewayError> {
        let request = self.request(GENERATE_ENDPOINT, token, body);
        let response = check_status(self.transport.send(request, cancel).await?)?;
        Ok(response.text())
    }

    /// Streaming generation; returns once the upstream accepted the request
    pub async fn stream(
        &self,
        token: &AccessToken,
        body: Value,
        cancel: CancellationToken,
    ) -> Result<StreamingResponse, GatewayError> {
        let mut request = self.request(STREAM_ENDPOINT, token, body);
        request.decompress = false;

        let mut response = self.transport.send_streaming(request, cancel).await?;
        if response.head().is_success() {
            return Ok(response);
        }

        // The SSE body is never gunzipped, but an error body has to be
        // readable before it is classified
        let head = response.head().clone();
        let body = decode_body(&head, response.bytes().await?);
        tracing::debug!(status = head.status, "upstream refused streaming request");

        check_status(TransportResponse {
            status: head.status,
            status_text: head.status_text,
            headers: head.headers,
            body,
        })
        .map(|_| response)
    }

    /// Raw `fetchAvailableModels` answer
    pub async fn fetch_models(&self, token: &AccessToken, cancel: CancellationToken) -> Result<String, GatewayError> {
        let request = self.request(MODELS_ENDPOINT, token, json!({ "project": token.project_id }));
        let response = check_status(self.transport.send(request, cancel).await?)?;
        Ok(response.text())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use bytes::Bytes;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use secrecy::SecretString;
    use tokio::sync::mpsc;

    use super::*;
    use crate::transport::{BodyChunk, ResponseHead, TransportError};

    fn response(status: u16, body: &'static str) -> TransportResponse {
        TransportResponse {
            status,
            status_text: String::new(),
            headers: Vec::new(),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn forbidden_with_marker_is_context_too_large() {
        let error = check_status(response(
            403,
            r#"{"error":{"message":"The caller does not have permission"}}"#,
        ))
        .unwrap_err();

        assert!(matches!(error, GatewayError::ContextTooLarge { ref body } if body.contains("permission")));
    }

    #[test]
    fn other_forbidden_is_account_disabled() {
        let error = check_status(response(403, "account suspended")).unwrap_err();
        assert!(matches!(error, GatewayError::AccountDisabled { ref body } if body == "account suspended"));
    }

    #[test]
    fn status_classes() {
        assert!(matches!(
            check_status(response(429, "slow down")).unwrap_err(),
            GatewayError::BadRequest { status: 429, ref body } if body == "slow down"
        ));
        assert!(matches!(
            check_status(response(502, "")).unwrap_err(),
            GatewayError::BadResponse { status: 502, .. }
        ));
        assert!(matches!(
            check_status(response(304, "")).unwrap_err(),
            GatewayError::Upstream { status: 304, .. }
        ));
        assert!(check_status(response(200, "{}")).is_ok());
    }

    #[test]
    fn endpoints_hang_off_base_url() {
        struct Unused;

        #[async_trait::async_trait]
        impl HttpTransport for Unused {
            async fn send(
                &self,
                _request: TransportRequest,
                _cancel: CancellationToken,
            ) -> Result<TransportResponse, TransportError> {
                unreachable!()
            }

            async fn send_streaming(
                &self,
                _request: TransportRequest,
                _cancel: CancellationToken,
            ) -> Result<StreamingResponse, TransportError> {
                unreachable!()
            }
        }

        let client = UpstreamClient::new(Arc::new(Unused), UpstreamConfig::default());

        assert_eq!(
            client.endpoint(STREAM_ENDPOINT),
            "https://daily-cloudcode-pa.sandbox.googleapis.com/v1internal:streamGenerateContent?alt=sse"
        );
    }

    /// Answers every streaming request with one fixed head and body
    struct FixedStream {
        head: ResponseHead,
        body: Vec<u8>,
    }

    #[async_trait::async_trait]
    impl HttpTransport for FixedStream {
        async fn send(
            &self,
            _request: TransportRequest,
            _cancel: CancellationToken,
        ) -> Result<TransportResponse, TransportError> {
            unreachable!()
        }

        async fn send_streaming(
            &self,
            request: TransportRequest,
            cancel: CancellationToken,
        ) -> Result<StreamingResponse, TransportError> {
            assert!(!request.decompress);
            let (tx, rx) = mpsc::unbounded_channel();
            tx.send(Ok(BodyChunk {
                data: Bytes::from(self.body.clone()),
                received: self.body.len() as u64,
                total: None,
            }))
            .unwrap();
            Ok(StreamingResponse::new(self.head.clone(), rx, cancel))
        }
    }

    fn token() -> AccessToken {
        AccessToken {
            account: 0,
            access_token: SecretString::from("t".to_owned()),
            session_id: "-1".to_owned(),
            project_id: "p".to_owned(),
        }
    }

    #[tokio::test]
    async fn gzipped_stream_refusal_is_classified_after_gunzip() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(br#"{"error":{"message":"The caller does not have permission"}}"#)
            .unwrap();
        let transport = FixedStream {
            head: ResponseHead {
                version: "1.1".to_owned(),
                status: 403,
                status_text: "Forbidden".to_owned(),
                headers: vec![("content-encoding".to_owned(), "gzip".to_owned())],
            },
            body: encoder.finish().unwrap(),
        };
        let client = UpstreamClient::new(Arc::new(transport), UpstreamConfig::default());

        let error = client
            .stream(&token(), json!({}), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, GatewayError::ContextTooLarge { ref body } if body.contains("permission")));
    }
}
