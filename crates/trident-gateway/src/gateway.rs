//! The gateway pipeline
//!
//! acquire token → encode (reads the signature cache) → upstream exchange →
//! decode → signature cache write. The streaming path hands the exchange to
//! a [`StreamMachine`] which performs the cache write when the stream ends.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use trident_config::Config;
use trident_core::{Clock, SystemClock};

use crate::collab::{
    AccessToken, DataUriImageStore, DebugSink, ImageStore, MemoryToolNameRegistry, NoopDebugSink, StaticTokenSource,
    TokenSource, ToolNameRegistry, TracingDebugSink,
};
use crate::convert::decode::{DecodeContext, decode_response};
use crate::convert::gemini::envelope;
use crate::convert::{EncodeContext, EncodeRequest};
use crate::error::GatewayError;
use crate::models::{ModelEntry, ModelListCache, parse_model_list};
use crate::protocol::gemini::GeminiResponse;
use crate::signature::{SignatureCache, SignaturePolicy, WriteContext};
use crate::stream::{StreamContext, StreamMachine, pump};
use crate::transport::{HttpTransport, ProcessTransport};
use crate::types::{CanonicalRequest, DecodedResponse, is_image_model};
use crate::upstream::UpstreamClient;

pub use crate::stream::EventStream;

/// Everything a [`Gateway`] is built from
pub struct GatewayParts {
    pub transport: Arc<dyn HttpTransport>,
    pub tokens: Arc<dyn TokenSource>,
    pub tool_names: Arc<dyn ToolNameRegistry>,
    pub images: Arc<dyn ImageStore>,
    pub debug: Arc<dyn DebugSink>,
    pub clock: Arc<dyn Clock>,
    pub config: Config,
}

/// Shared gateway service, cheap to clone
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    upstream: UpstreamClient,
    tokens: Arc<dyn TokenSource>,
    signatures: Arc<SignatureCache>,
    tool_names: Arc<dyn ToolNameRegistry>,
    images: Arc<dyn ImageStore>,
    debug: Arc<dyn DebugSink>,
    models: ModelListCache,
    default_thinking_budget: u32,
    expose_signatures: bool,
}

/// An encoded request bound to the token it will be sent with
struct Prepared {
    token: AccessToken,
    request: CanonicalRequest,
    body: serde_json::Value,
    correlation_id: String,
}

impl Gateway {
    /// Build the gateway with the default collaborators
    pub fn from_config(config: &Config) -> Self {
        let debug: Arc<dyn DebugSink> = if config.debug.dump {
            Arc::new(TracingDebugSink)
        } else {
            Arc::new(NoopDebugSink)
        };

        Self::new(GatewayParts {
            transport: Arc::new(ProcessTransport::new(&config.transport)),
            tokens: Arc::new(StaticTokenSource::new(&config.accounts)),
            tool_names: Arc::new(MemoryToolNameRegistry::new()),
            images: Arc::new(DataUriImageStore),
            debug,
            clock: Arc::new(SystemClock),
            config: Config {
                upstream: config.upstream.clone(),
                signatures: config.signatures.clone(),
                thinking: config.thinking.clone(),
                ..Config::default()
            },
        })
    }

    pub fn new(parts: GatewayParts) -> Self {
        let config = parts.config;

        Self {
            inner: Arc::new(GatewayInner {
                models: ModelListCache::new(
                    Duration::from_secs(config.upstream.model_list_ttl_seconds),
                    Arc::clone(&parts.clock),
                ),
                signatures: Arc::new(SignatureCache::new(
                    SignaturePolicy::from(&config.signatures),
                    parts.clock,
                )),
                upstream: UpstreamClient::new(parts.transport, config.upstream),
                tokens: parts.tokens,
                tool_names: parts.tool_names,
                images: parts.images,
                debug: parts.debug,
                default_thinking_budget: config.thinking.default_budget,
                expose_signatures: config.signatures.expose_to_clients,
            }),
        }
    }

    pub fn signatures(&self) -> &Arc<SignatureCache> {
        &self.inner.signatures
    }

    /// Whether decoded responses should carry signatures to clients
    pub fn expose_signatures(&self) -> bool {
        self.inner.expose_signatures
    }

    /// Run a buffered exchange
    pub async fn complete<R>(&self, request: R, cancel: CancellationToken) -> Result<DecodedResponse, GatewayError>
    where
        R: EncodeRequest + Send,
    {
        let prepared = self.prepare(request).await?;
        let model = prepared.request.model.as_str();

        let body = self
            .inner
            .upstream
            .generate(&prepared.token, prepared.body.clone(), cancel)
            .await
            .map_err(|e| self.observe_failure(&prepared.token, e))?;
        self.inner.debug.response(&prepared.correlation_id, &body);

        let value = serde_json::from_str(&body)
            .map_err(|e| GatewayError::ResponseProcessing(format!("upstream body is not JSON: {e}")))?;
        let response = GeminiResponse::from_upstream(value)
            .map_err(|e| GatewayError::ResponseProcessing(format!("unexpected upstream response: {e}")))?;

        let decoded = decode_response(
            &response,
            &DecodeContext {
                model,
                tool_names: self.inner.tool_names.as_ref(),
                images: self.inner.images.as_ref(),
            },
        );

        if let Some(signature) = decoded.cacheable_signature() {
            self.inner.signatures.set(
                &prepared.token.session_id,
                model,
                signature,
                &decoded.reasoning,
                WriteContext {
                    has_tools: !decoded.tool_calls.is_empty(),
                    is_image_model: is_image_model(model),
                },
            );
        }

        Ok(decoded)
    }

    /// Run a streaming exchange
    ///
    /// Returns once the upstream accepted the request. Dropping the stream
    /// cancels the exchange.
    pub async fn complete_stream<R>(&self, request: R, cancel: CancellationToken) -> Result<EventStream, GatewayError>
    where
        R: EncodeRequest + Send,
    {
        let prepared = self.prepare(request).await?;

        let response = self
            .inner
            .upstream
            .stream(&prepared.token, prepared.body, cancel)
            .await
            .map_err(|e| self.observe_failure(&prepared.token, e))?;

        let machine = StreamMachine::new(StreamContext {
            model: prepared.request.model,
            session_id: prepared.token.session_id,
            signatures: Arc::clone(&self.inner.signatures),
            tool_names: Arc::clone(&self.inner.tool_names),
            images: Arc::clone(&self.inner.images),
        });

        Ok(pump(response, machine, Arc::clone(&self.inner.debug), prepared.correlation_id))
    }

    /// Models the upstream offers, cached for the configured TTL
    pub async fn models(&self, cancel: CancellationToken) -> Result<Arc<Vec<ModelEntry>>, GatewayError> {
        self.inner
            .models
            .get_or_fetch(|| async move {
                let token = self.inner.tokens.acquire().await.ok_or(GatewayError::NoToken)?;
                let body = self
                    .inner
                    .upstream
                    .fetch_models(&token, cancel)
                    .await
                    .map_err(|e| self.observe_failure(&token, e))?;
                parse_model_list(&body)
            })
            .await
    }

    async fn prepare<R>(&self, request: R) -> Result<Prepared, GatewayError>
    where
        R: EncodeRequest + Send,
    {
        let token = self.inner.tokens.acquire().await.ok_or(GatewayError::NoToken)?;

        let request = request.encode(&EncodeContext {
            session_id: &token.session_id,
            signatures: &self.inner.signatures,
            tool_names: self.inner.tool_names.as_ref(),
            default_thinking_budget: self.inner.default_thinking_budget,
        })?;

        let envelope = envelope(&request, &token.project_id, &token.session_id);
        let correlation_id = envelope.request_id.clone();
        let body = serde_json::to_value(&envelope)
            .map_err(|e| GatewayError::InvalidRequest(format!("failed to serialize upstream request: {e}")))?;

        tracing::debug!(
            correlation_id,
            model = %request.model,
            stream = request.stream,
            thinking = request.thinking_enabled(),
            "sending upstream request"
        );
        self.inner.debug.request(&correlation_id, &body.to_string());

        Ok(Prepared {
            token,
            request,
            body,
            correlation_id,
        })
    }

    /// Apply the disable hook for revoked accounts
    fn observe_failure(&self, token: &AccessToken, error: GatewayError) -> GatewayError {
        if matches!(error, GatewayError::AccountDisabled { .. }) {
            self.inner.tokens.disable(token);
        }
        tracing::warn!(error = %error, status = ?error.upstream_status(), "upstream exchange failed");
        error
    }
}
