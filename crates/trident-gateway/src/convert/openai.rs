//! Conversion between canonical types and the `OpenAI` wire format

use serde_json::{Value, json};

use super::builder::{ContentBuilder, ModelTurn, TurnToolCall};
use super::{EncodeContext, EncodeRequest, ThinkingRequest, image_from_data_uri, thinking_params, tool_definition};
use crate::error::GatewayError;
use crate::protocol::openai::{
    OpenAiChoice, OpenAiChoiceMessage, OpenAiCompletionTokensDetails, OpenAiContent, OpenAiContentPart,
    OpenAiFunctionCall, OpenAiRequest, OpenAiResponse, OpenAiStreamChoice, OpenAiStreamChunk, OpenAiStreamDelta,
    OpenAiStreamFunctionCall, OpenAiStreamToolCall, OpenAiToolCall, OpenAiUsage,
};
use crate::types::{
    CanonicalRequest, DecodedResponse, FinishReason, GenerationParams, Part, StreamEvent, ToolConfig, ToolMode, Usage,
};

// -- Inbound: OpenAI wire format -> canonical --

impl EncodeRequest for OpenAiRequest {
    fn model(&self) -> &str {
        &self.model
    }

    fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    fn encode(self, context: &EncodeContext<'_>) -> Result<CanonicalRequest, GatewayError> {
        let model = self.model;
        let thinking = thinking_params(
            &model,
            ThinkingRequest::from_effort(self.reasoning_effort.as_deref()),
            context.default_thinking_budget,
        );

        let tools = self
            .tools
            .unwrap_or_default()
            .into_iter()
            .map(|tool| {
                tool_definition(
                    context,
                    &model,
                    &tool.function.name,
                    tool.function.description,
                    tool.function.parameters,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let signatures = context.signatures.resolve(context.session_id, &model, !tools.is_empty());
        let mut builder = ContentBuilder::new(&model, thinking.is_some(), signatures, context.tool_names);
        let mut system = Vec::new();

        for message in self.messages {
            match message.role.as_str() {
                "system" | "developer" => system.push(split_content(message.content).0),
                "assistant" => builder.push_model(ModelTurn {
                    text: split_content(message.content).0,
                    reasoning: message.reasoning_content,
                    reasoning_signature: message.reasoning_signature,
                    tool_calls: message
                        .tool_calls
                        .unwrap_or_default()
                        .into_iter()
                        .map(turn_tool_call)
                        .collect(),
                }),
                "tool" | "function" => {
                    let call_id = message.tool_call_id.unwrap_or_default();
                    builder.push_tool_result(&call_id, split_content(message.content).0);
                }
                _ => {
                    let (text, images) = split_content(message.content);
                    builder.push_user(&text, images);
                }
            }
        }

        let contents = builder.finish();
        let system_instruction = system.into_iter().filter(|text| !text.is_empty()).collect::<Vec<_>>();

        Ok(CanonicalRequest {
            contents,
            system_instruction: (!system_instruction.is_empty()).then(|| system_instruction.join("\n\n")),
            tool_config: self.tool_choice.as_ref().and_then(tool_config),
            generation: GenerationParams {
                temperature: self.temperature,
                top_p: self.top_p,
                top_k: None,
                max_output_tokens: self.max_completion_tokens.or(self.max_tokens),
                stop_sequences: self.stop.map(|stop| stop.into_vec()).unwrap_or_default(),
            },
            tools,
            thinking,
            stream: self.stream.unwrap_or(false),
            model,
        })
    }
}

/// Split content into text and data-URI images
fn split_content(content: Option<OpenAiContent>) -> (String, Vec<Part>) {
    match content {
        None => (String::new(), Vec::new()),
        Some(OpenAiContent::Text(text)) => (text, Vec::new()),
        Some(OpenAiContent::Parts(parts)) => {
            let mut text = String::new();
            let mut images = Vec::new();

            for part in parts {
                match part {
                    OpenAiContentPart::Text { text: fragment } => text.push_str(&fragment),
                    OpenAiContentPart::ImageUrl { image_url } => images.extend(image_from_data_uri(&image_url.url)),
                    OpenAiContentPart::Unsupported => {}
                }
            }

            (text, images)
        }
    }
}

fn turn_tool_call(call: OpenAiToolCall) -> TurnToolCall {
    let args = if call.function.arguments.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&call.function.arguments).unwrap_or_else(|e| {
            tracing::debug!(error = %e, call_id = %call.id, "tool call arguments are not valid JSON");
            json!({})
        })
    };

    TurnToolCall {
        id: call.id,
        name: call.function.name,
        args,
        signature: call.thought_signature,
    }
}

/// Parse the flexible `tool_choice` field
fn tool_config(choice: &Value) -> Option<ToolConfig> {
    let (mode, allowed) = match choice {
        Value::String(mode) => match mode.as_str() {
            "none" => (ToolMode::None, Vec::new()),
            "required" => (ToolMode::Any, Vec::new()),
            "auto" => (ToolMode::Auto, Vec::new()),
            _ => return None,
        },
        Value::Object(_) => {
            let name = choice.pointer("/function/name").and_then(Value::as_str)?;
            (
                ToolMode::Any,
                vec![super::schema::sanitize_tool_name(name).into_owned()],
            )
        }
        _ => return None,
    };

    Some(ToolConfig { mode, allowed })
}

// -- Outbound: decoded -> OpenAI wire format --

pub const fn finish_reason_name(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::ContentFilter => "content_filter",
    }
}

fn usage(usage: Usage) -> OpenAiUsage {
    OpenAiUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
        completion_tokens_details: (usage.thoughts_tokens > 0).then_some(OpenAiCompletionTokensDetails {
            reasoning_tokens: usage.thoughts_tokens,
        }),
    }
}

/// Build the client response for a buffered exchange
pub fn to_openai_response(decoded: &DecodedResponse, id: &str, created: u64, expose_signatures: bool) -> OpenAiResponse {
    let tool_calls: Vec<OpenAiToolCall> = decoded
        .tool_calls
        .iter()
        .map(|call| OpenAiToolCall {
            id: call.id.clone(),
            tool_type: "function".to_owned(),
            function: OpenAiFunctionCall {
                name: call.name.clone(),
                arguments: call.args.to_string(),
            },
            thought_signature: call.signature.clone().filter(|_| expose_signatures),
        })
        .collect();

    OpenAiResponse {
        id: id.to_owned(),
        object: "chat.completion".to_owned(),
        created,
        model: decoded.model.clone(),
        choices: vec![OpenAiChoice {
            index: 0,
            message: OpenAiChoiceMessage {
                role: "assistant".to_owned(),
                content: (!decoded.text.is_empty() || tool_calls.is_empty()).then(|| decoded.text.clone()),
                reasoning_content: (!decoded.reasoning.is_empty()).then(|| decoded.reasoning.clone()),
                reasoning_signature: decoded.reasoning_signature.clone().filter(|_| expose_signatures),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: Some(finish_reason_name(decoded.finish_reason.unwrap_or(FinishReason::Stop)).to_owned()),
        }],
        usage: decoded.usage.map(usage),
    }
}

/// Turns stream events into `chat.completion.chunk` objects
pub struct OpenAiStreamEncoder {
    id: String,
    model: String,
    created: u64,
    expose_signatures: bool,
    role_sent: bool,
}

impl OpenAiStreamEncoder {
    pub fn new(id: String, model: String, created: u64, expose_signatures: bool) -> Self {
        Self {
            id,
            model,
            created,
            expose_signatures,
            role_sent: false,
        }
    }

    pub fn encode(&mut self, event: StreamEvent) -> Option<OpenAiStreamChunk> {
        let mut delta = OpenAiStreamDelta::default();
        let mut finish_reason = None;
        let mut chunk_usage = None;

        match event {
            StreamEvent::TextDelta(text) => delta.content = Some(text),
            StreamEvent::ReasoningDelta { text, signature } => {
                delta.reasoning_signature = signature.filter(|_| self.expose_signatures);
                if text.is_empty() && delta.reasoning_signature.is_none() {
                    return None;
                }
                delta.reasoning_content = Some(text);
            }
            StreamEvent::ToolCallDelta(call) => {
                delta.tool_calls = Some(vec![OpenAiStreamToolCall {
                    index: u32::try_from(call.index).unwrap_or(u32::MAX),
                    tool_type: call.id.as_ref().map(|_| "function".to_owned()),
                    id: call.id,
                    function: Some(OpenAiStreamFunctionCall {
                        name: call.name,
                        arguments: call.args,
                    }),
                    thought_signature: call.signature.filter(|_| self.expose_signatures),
                }]);
            }
            StreamEvent::Done {
                finish_reason: reason,
                usage: done_usage,
            } => {
                finish_reason = Some(finish_reason_name(reason.unwrap_or(FinishReason::Stop)).to_owned());
                chunk_usage = done_usage.map(usage);
            }
        }

        if !self.role_sent {
            delta.role = Some("assistant".to_owned());
            self.role_sent = true;
        }

        Some(OpenAiStreamChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_owned(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![OpenAiStreamChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: chunk_usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use trident_core::SystemClock;

    use super::*;
    use crate::collab::MemoryToolNameRegistry;
    use crate::signature::{DEFAULT_FALLBACK_SIGNATURE, SignatureCache, SignaturePolicy, WriteContext};
    use crate::types::{DecodedToolCall, Role, ToolCallDelta};

    fn request(model: &str, messages: Value) -> OpenAiRequest {
        serde_json::from_value(json!({"model": model, "messages": messages})).unwrap()
    }

    fn encode_with(request: OpenAiRequest, cache: &SignatureCache) -> CanonicalRequest {
        let registry = MemoryToolNameRegistry::new();
        let context = EncodeContext {
            session_id: "-1",
            signatures: cache,
            tool_names: &registry,
            default_thinking_budget: 1024,
        };
        request.encode(&context).unwrap()
    }

    fn policy(read_cache: bool, fallback: bool) -> SignaturePolicy {
        SignaturePolicy {
            read_cache,
            fallback,
            ..SignaturePolicy::default()
        }
    }

    fn cache(policy: SignaturePolicy) -> SignatureCache {
        SignatureCache::new(policy, Arc::new(SystemClock))
    }

    #[test]
    fn no_signature_means_no_thought() {
        let request = request(
            "claude-sonnet-4-5-thinking",
            json!([
                {"role": "user", "content": "Hello"},
                {"role": "assistant", "content": "Hi", "reasoning_content": "because"}
            ]),
        );

        let canonical = encode_with(request, &cache(policy(false, false)));

        assert!(canonical.thinking_enabled());
        let model = &canonical.contents[1];
        assert_eq!(model.role, Role::Model);
        assert!(model.parts.iter().all(|part| !part.is_thought()));
    }

    #[test]
    fn fallback_signature_with_thinking_model() {
        let request = request(
            "claude-sonnet-4-5-thinking",
            json!([
                {"role": "user", "content": "Hello"},
                {"role": "assistant", "content": "Hi", "reasoning_content": "because"}
            ]),
        );

        let canonical = encode_with(request, &cache(policy(false, true)));

        match &canonical.contents[1].parts[0] {
            Part::Thought {
                signature: Some(signature),
                text,
            } => {
                assert_eq!(signature, DEFAULT_FALLBACK_SIGNATURE);
                assert_eq!(text, "because");
            }
            other => panic!("expected thought part, got {other:?}"),
        }
    }

    #[test]
    fn cached_signature_is_replayed_for_session() {
        let cache = cache(SignaturePolicy::default());
        cache.set(
            "-1",
            "gemini-3-pro-preview",
            "cached-sig",
            "earlier",
            WriteContext::default(),
        );

        let canonical = encode_with(
            request(
                "gemini-3-pro-preview",
                json!([
                    {"role": "user", "content": "Hello"},
                    {"role": "assistant", "content": "Hi"},
                    {"role": "user", "content": "More"}
                ]),
            ),
            &cache,
        );

        assert_eq!(
            canonical.contents[1].parts[0],
            Part::Thought {
                text: "earlier".to_owned(),
                signature: Some("cached-sig".to_owned()),
            }
        );
    }

    #[test]
    fn tool_round_trip_encoding() {
        let request: OpenAiRequest = serde_json::from_value(json!({
            "model": "gemini-2.5-flash",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": [
                    {"type": "text", "text": "weather in Paris?"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}}
                ]},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "sunny"}
            ],
            "tools": [{"type": "function", "function": {"name": "get_weather", "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}}}],
            "tool_choice": "required",
            "max_tokens": 100,
            "stop": "END"
        }))
        .unwrap();

        let canonical = encode_with(request, &cache(SignaturePolicy::default()));

        assert_eq!(canonical.system_instruction.as_deref(), Some("be terse"));
        assert_eq!(canonical.contents.len(), 3);
        assert!(matches!(canonical.contents[0].parts[0], Part::Image { .. }));
        assert!(matches!(
            &canonical.contents[1].parts[0],
            Part::FunctionCall { name, args, .. } if name == "get_weather" && args["city"] == "Paris"
        ));
        assert!(matches!(
            &canonical.contents[2].parts[0],
            Part::FunctionResponse { name, output, .. } if name == "get_weather" && output["output"] == "sunny"
        ));
        assert_eq!(canonical.tools.len(), 1);
        assert_eq!(canonical.tool_config.as_ref().unwrap().mode, ToolMode::Any);
        assert_eq!(canonical.generation.max_output_tokens, Some(100));
        assert_eq!(canonical.generation.stop_sequences, vec!["END"]);
        assert!(!canonical.thinking_enabled());
    }

    #[test]
    fn response_hides_signatures_unless_exposed() {
        let decoded = DecodedResponse {
            model: "m".to_owned(),
            text: String::new(),
            reasoning: "why".to_owned(),
            reasoning_signature: Some("sig".to_owned()),
            tool_calls: vec![DecodedToolCall {
                id: "c1".to_owned(),
                name: "f".to_owned(),
                args: json!({"a": 1}),
                signature: Some("call-sig".to_owned()),
            }],
            finish_reason: Some(FinishReason::ToolCalls),
            usage: None,
        };

        let hidden = to_openai_response(&decoded, "chatcmpl-1", 0, false);
        let message = &hidden.choices[0].message;
        assert_eq!(message.content, None);
        assert_eq!(message.reasoning_content.as_deref(), Some("why"));
        assert_eq!(message.reasoning_signature, None);
        assert_eq!(message.tool_calls.as_ref().unwrap()[0].thought_signature, None);
        assert_eq!(message.tool_calls.as_ref().unwrap()[0].function.arguments, "{\"a\":1}");
        assert_eq!(hidden.choices[0].finish_reason.as_deref(), Some("tool_calls"));

        let exposed = to_openai_response(&decoded, "chatcmpl-1", 0, true);
        assert_eq!(exposed.choices[0].message.reasoning_signature.as_deref(), Some("sig"));
    }

    #[test]
    fn stream_encoder_sends_role_once() {
        let mut encoder = OpenAiStreamEncoder::new("chatcmpl-1".to_owned(), "m".to_owned(), 0, false);

        let first = encoder.encode(StreamEvent::TextDelta("He".to_owned())).unwrap();
        let second = encoder.encode(StreamEvent::TextDelta("llo".to_owned())).unwrap();
        let tool = encoder
            .encode(StreamEvent::ToolCallDelta(ToolCallDelta {
                index: 0,
                id: Some("c1".to_owned()),
                name: Some("f".to_owned()),
                args: Some("{}".to_owned()),
                signature: None,
            }))
            .unwrap();
        let done = encoder
            .encode(StreamEvent::Done {
                finish_reason: Some(FinishReason::ToolCalls),
                usage: Some(Usage {
                    prompt_tokens: 1,
                    completion_tokens: 2,
                    total_tokens: 3,
                    ..Usage::default()
                }),
            })
            .unwrap();

        assert_eq!(first.choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(second.choices[0].delta.role, None);
        assert_eq!(
            tool.choices[0].delta.tool_calls.as_ref().unwrap()[0].tool_type.as_deref(),
            Some("function")
        );
        assert_eq!(done.choices[0].finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(done.usage.as_ref().unwrap().total_tokens, 3);
        assert!(
            encoder
                .encode(StreamEvent::ReasoningDelta {
                    text: String::new(),
                    signature: Some("hidden".to_owned()),
                })
                .is_none()
        );
    }
}
