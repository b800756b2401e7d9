//! Upstream response parts to [`DecodedResponse`]

use crate::collab::{ImageStore, ToolNameRegistry};
use crate::protocol::gemini::{GeminiFunctionCall, GeminiResponse, GeminiUsageMetadata};
use crate::types::{DecodedResponse, DecodedToolCall, FinishReason, Usage, is_image_model};

/// Collaborators needed while decoding
pub struct DecodeContext<'a> {
    pub model: &'a str,
    pub tool_names: &'a dyn ToolNameRegistry,
    pub images: &'a dyn ImageStore,
}

impl DecodeContext<'_> {
    /// Client name for a sanitized tool name
    pub fn tool_name(&self, sanitized: &str) -> String {
        self.tool_names
            .original(self.model, sanitized)
            .unwrap_or_else(|| sanitized.to_owned())
    }

    /// Convert an upstream function call, generating an id when absent
    pub fn tool_call(&self, call: &GeminiFunctionCall, signature: Option<String>) -> DecodedToolCall {
        DecodedToolCall {
            id: call.id.clone().unwrap_or_else(generate_call_id),
            name: self.tool_name(&call.name),
            args: call.args.clone(),
            signature,
        }
    }

    /// Persist an inline image and render it as a Markdown link
    ///
    /// Only image-generating models get their images rendered.
    pub fn image_markdown(&self, data: &str, mime_type: &str) -> Option<String> {
        if !is_image_model(self.model) {
            tracing::debug!(model = self.model, mime_type, "dropping inline image from non-image model");
            return None;
        }

        Some(format!("![image]({})", self.images.save(data, mime_type)))
    }
}

pub fn generate_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Decode a complete (non-streaming) upstream response
pub fn decode_response(response: &GeminiResponse, context: &DecodeContext<'_>) -> DecodedResponse {
    let mut decoded = DecodedResponse {
        model: context.model.to_owned(),
        ..DecodedResponse::default()
    };
    let mut images = Vec::new();

    for part in response.parts() {
        if let Some(call) = &part.function_call {
            decoded
                .tool_calls
                .push(context.tool_call(call, part.thought_signature.clone()));
            continue;
        }

        if let Some(inline) = &part.inline_data {
            images.extend(context.image_markdown(&inline.data, &inline.mime_type));
            continue;
        }

        if part.thought_signature.is_some() {
            decoded.reasoning_signature.clone_from(&part.thought_signature);
        }

        if let Some(text) = &part.text {
            if part.is_thought() {
                decoded.reasoning.push_str(text);
            } else {
                decoded.text.push_str(text);
            }
        }
    }

    append_images(&mut decoded.text, &images);

    decoded.finish_reason = response.finish_reason().map(|reason| {
        if decoded.tool_calls.is_empty() {
            FinishReason::from_upstream(reason)
        } else {
            FinishReason::ToolCalls
        }
    });
    decoded.usage = response.usage_metadata.as_ref().map(usage_from_upstream);

    decoded
}

/// Append Markdown image links after any text
pub fn append_images(text: &mut String, images: &[String]) {
    for image in images {
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        text.push_str(image);
    }
}

pub fn usage_from_upstream(metadata: &GeminiUsageMetadata) -> Usage {
    let thoughts = metadata.thoughts_token_count.unwrap_or(0);
    let completion = metadata.candidates_token_count + thoughts;

    Usage {
        prompt_tokens: metadata.prompt_token_count,
        completion_tokens: completion,
        total_tokens: if metadata.total_token_count == 0 {
            metadata.prompt_token_count + completion
        } else {
            metadata.total_token_count
        },
        thoughts_tokens: thoughts,
        cached_tokens: metadata.cached_content_token_count.unwrap_or(0),
    }
}
