//! Conversion between client wire formats and the canonical model
//!
//! Encoders turn a client request into a [`CanonicalRequest`]; decoders turn
//! a [`DecodedResponse`] or a stream of [`StreamEvent`]s back into the
//! client's shape.
//!
//! [`StreamEvent`]: crate::types::StreamEvent

pub mod anthropic;
pub mod builder;
pub mod decode;
pub mod gemini;
pub mod openai;
pub mod schema;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::collab::ToolNameRegistry;
use crate::error::GatewayError;
use crate::signature::SignatureCache;
use crate::types::{CanonicalRequest, Part, ThinkingParams, ToolDefinition, model_thinks};

/// Per-exchange inputs every encoder needs
pub struct EncodeContext<'a> {
    pub session_id: &'a str,
    pub signatures: &'a SignatureCache,
    pub tool_names: &'a dyn ToolNameRegistry,
    pub default_thinking_budget: u32,
}

/// A client request that can be encoded into canonical form
pub trait EncodeRequest {
    fn model(&self) -> &str;

    fn is_stream(&self) -> bool;

    fn encode(self, context: &EncodeContext<'_>) -> Result<CanonicalRequest, GatewayError>;
}

/// What the client asked for regarding reasoning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingRequest {
    Unspecified,
    Disabled,
    Enabled { budget: Option<u32> },
}

impl ThinkingRequest {
    /// Map an `OpenAI` `reasoning_effort`
    pub fn from_effort(effort: Option<&str>) -> Self {
        match effort {
            None => Self::Unspecified,
            Some("none") => Self::Disabled,
            Some("low" | "minimal") => Self::Enabled { budget: Some(1024) },
            Some("medium") => Self::Enabled { budget: Some(8192) },
            Some("high") => Self::Enabled { budget: Some(24576) },
            Some(_) => Self::Enabled { budget: None },
        }
    }
}

/// Decide whether thinking is on for this exchange and with what budget
///
/// Thinking models always reason; any other model reasons only when the
/// client asks for it.
pub fn thinking_params(model: &str, request: ThinkingRequest, default_budget: u32) -> Option<ThinkingParams> {
    let budget = match request {
        ThinkingRequest::Enabled { budget } => budget.unwrap_or(default_budget),
        ThinkingRequest::Unspecified | ThinkingRequest::Disabled if model_thinks(model) => default_budget,
        ThinkingRequest::Unspecified | ThinkingRequest::Disabled => return None,
    };

    Some(ThinkingParams { budget })
}

/// Parse a base64 `data:` URI into an image part
///
/// Anything else, including non-base64 data URIs and undecodable payloads,
/// yields `None`.
pub fn image_from_data_uri(uri: &str) -> Option<Part> {
    let (header, data) = uri.strip_prefix("data:")?.split_once(',')?;
    let mime_type = header.strip_suffix(";base64")?;

    if mime_type.is_empty() || STANDARD.decode(data).is_err() {
        tracing::debug!(mime_type, "dropping undecodable data URI image");
        return None;
    }

    Some(Part::Image {
        mime_type: mime_type.to_owned(),
        data: data.to_owned(),
    })
}

/// Build a tool definition, registering the client name if it had to change
pub fn tool_definition(
    context: &EncodeContext<'_>,
    model: &str,
    name: &str,
    description: Option<String>,
    parameters: Option<serde_json::Value>,
) -> Result<ToolDefinition, GatewayError> {
    let parameters = schema::tool_parameters(name, parameters)?;
    let sanitized = schema::sanitize_tool_name(name);
    if sanitized != name {
        context.tool_names.register(model, &sanitized, name);
    }

    Ok(ToolDefinition {
        name: sanitized.into_owned(),
        description,
        parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thinking_follows_model_and_client() {
        assert_eq!(
            thinking_params("claude-sonnet-4-5-thinking", ThinkingRequest::Unspecified, 1024),
            Some(ThinkingParams { budget: 1024 })
        );
        assert_eq!(thinking_params("gemini-2.5-flash", ThinkingRequest::Unspecified, 1024), None);
        assert_eq!(
            thinking_params(
                "gemini-2.5-flash",
                ThinkingRequest::from_effort(Some("medium")),
                1024
            ),
            Some(ThinkingParams { budget: 8192 })
        );
        assert_eq!(
            thinking_params("gemini-2.5-flash", ThinkingRequest::Enabled { budget: None }, 2048),
            Some(ThinkingParams { budget: 2048 })
        );
    }

    #[test]
    fn data_uri_images() {
        assert_eq!(
            image_from_data_uri("data:image/png;base64,iVBORw0KGgo="),
            Some(Part::Image {
                mime_type: "image/png".to_owned(),
                data: "iVBORw0KGgo=".to_owned(),
            })
        );
        assert_eq!(image_from_data_uri("https://example.com/cat.png"), None);
        assert_eq!(image_from_data_uri("data:text/plain,hello"), None);
        assert_eq!(image_from_data_uri("data:image/png;base64,@@@"), None);
    }
}
