//! Conversion between canonical types and the Anthropic Messages format

use serde_json::{Value, json};

use super::builder::{ContentBuilder, ModelTurn, TurnToolCall};
use super::schema::sanitize_tool_name;
use super::{EncodeContext, EncodeRequest, ThinkingRequest, thinking_params, tool_definition};
use crate::error::GatewayError;
use crate::protocol::anthropic::{
    AnthropicContent, AnthropicContentBlock, AnthropicImageSource, AnthropicMessageDelta, AnthropicRequest,
    AnthropicResponse, AnthropicResponseBlock, AnthropicStreamContentBlock, AnthropicStreamDelta,
    AnthropicStreamEvent, AnthropicStreamMessage, AnthropicThinking, AnthropicToolChoice, AnthropicUsage,
};
use crate::types::{
    CanonicalRequest, DecodedResponse, FinishReason, GenerationParams, Part, StreamEvent, ToolCallDelta, ToolConfig,
    ToolMode, Usage,
};

// -- Inbound: Anthropic wire format -> canonical --

impl EncodeRequest for AnthropicRequest {
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
            thinking_request(self.thinking.as_ref()),
            context.default_thinking_budget,
        );

        let tools = self
            .tools
            .unwrap_or_default()
            .into_iter()
            .map(|tool| {
                let schema = (!tool.input_schema.is_null()).then_some(tool.input_schema);
                tool_definition(context, &model, &tool.name, tool.description, schema)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let signatures = context.signatures.resolve(context.session_id, &model, !tools.is_empty());
        let mut builder = ContentBuilder::new(&model, thinking.is_some(), signatures, context.tool_names);

        for message in self.messages {
            let blocks = match message.content {
                AnthropicContent::Text(text) => vec![AnthropicContentBlock::Text { text }],
                AnthropicContent::Blocks(blocks) => blocks,
            };

            if message.role == "assistant" {
                builder.push_model(model_turn(blocks));
            } else {
                push_user_blocks(&mut builder, blocks);
            }
        }

        let system_instruction = self
            .system
            .map(|system| system.into_text())
            .filter(|text| !text.is_empty());

        Ok(CanonicalRequest {
            contents: builder.finish(),
            system_instruction,
            tool_config: self.tool_choice.as_ref().and_then(tool_config),
            generation: GenerationParams {
                temperature: self.temperature,
                top_p: self.top_p,
                top_k: self.top_k,
                max_output_tokens: Some(self.max_tokens),
                stop_sequences: self.stop_sequences.unwrap_or_default(),
            },
            tools,
            thinking,
            stream: self.stream.unwrap_or(false),
            model,
        })
    }
}

fn thinking_request(thinking: Option<&AnthropicThinking>) -> ThinkingRequest {
    match thinking {
        None => ThinkingRequest::Unspecified,
        Some(thinking) if thinking.thinking_type == "enabled" => ThinkingRequest::Enabled {
            budget: thinking.budget_tokens,
        },
        Some(_) => ThinkingRequest::Disabled,
    }
}

fn model_turn(blocks: Vec<AnthropicContentBlock>) -> ModelTurn {
    let mut turn = ModelTurn::default();

    for block in blocks {
        match block {
            AnthropicContentBlock::Text { text } => turn.text.push_str(&text),
            AnthropicContentBlock::Thinking { thinking, signature } => {
                turn.reasoning.get_or_insert_with(String::new).push_str(&thinking);
                if signature.as_deref().is_some_and(|signature| !signature.is_empty()) {
                    turn.reasoning_signature = signature;
                }
            }
            AnthropicContentBlock::ToolUse { id, name, input } => turn.tool_calls.push(TurnToolCall {
                id,
                name,
                args: if input.is_null() { json!({}) } else { input },
                signature: None,
            }),
            AnthropicContentBlock::RedactedThinking { .. }
            | AnthropicContentBlock::Image { .. }
            | AnthropicContentBlock::ToolResult { .. } => {}
        }
    }

    turn
}

/// Tool results become function responses; any text or images sent alongside
/// them join the same user message
fn push_user_blocks(builder: &mut ContentBuilder<'_>, blocks: Vec<AnthropicContentBlock>) {
    let mut text = String::new();
    let mut images = Vec::new();
    let mut saw_tool_result = false;

    for block in blocks {
        match block {
            AnthropicContentBlock::Text { text: fragment } => text.push_str(&fragment),
            AnthropicContentBlock::Image { source } => images.extend(image_part(source)),
            AnthropicContentBlock::ToolResult {
                tool_use_id, content, ..
            } => {
                saw_tool_result = true;
                let output = content.map(|content| content.into_text()).unwrap_or_default();
                builder.push_tool_result(&tool_use_id, output);
            }
            AnthropicContentBlock::Thinking { .. }
            | AnthropicContentBlock::RedactedThinking { .. }
            | AnthropicContentBlock::ToolUse { .. } => {}
        }
    }

    if saw_tool_result {
        if !text.is_empty() || !images.is_empty() {
            builder.extend_tool_results(&text, images);
        }
    } else {
        builder.push_user(&text, images);
    }
}

fn image_part(source: AnthropicImageSource) -> Option<Part> {
    if source.source_type != "base64" {
        tracing::debug!(source_type = %source.source_type, "dropping non-inline image");
        return None;
    }

    let mime_type = source.media_type?;
    super::image_from_data_uri(&format!("data:{mime_type};base64,{}", source.data?))
}

fn tool_config(choice: &AnthropicToolChoice) -> Option<ToolConfig> {
    let (mode, allowed) = match choice.choice_type.as_str() {
        "auto" => (ToolMode::Auto, Vec::new()),
        "any" => (ToolMode::Any, Vec::new()),
        "none" => (ToolMode::None, Vec::new()),
        "tool" => (
            ToolMode::Any,
            choice
                .name
                .iter()
                .map(|name| sanitize_tool_name(name).into_owned())
                .collect(),
        ),
        _ => return None,
    };

    Some(ToolConfig { mode, allowed })
}

// -- Outbound: decoded -> Anthropic wire format --

pub const fn stop_reason(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop | FinishReason::ContentFilter => "end_turn",
        FinishReason::Length => "max_tokens",
        FinishReason::ToolCalls => "tool_use",
    }
}

fn usage(usage: Option<Usage>) -> AnthropicUsage {
    let usage = usage.unwrap_or_default();
    AnthropicUsage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        cache_read_input_tokens: (usage.cached_tokens > 0).then_some(usage.cached_tokens),
    }
}

/// Build the client response for a buffered exchange
pub fn to_anthropic_response(decoded: &DecodedResponse, id: &str, expose_signatures: bool) -> AnthropicResponse {
    let mut content = Vec::new();

    let signature = decoded.reasoning_signature.clone().filter(|_| expose_signatures);
    if !decoded.reasoning.is_empty() || signature.is_some() {
        content.push(AnthropicResponseBlock::Thinking {
            thinking: decoded.reasoning.clone(),
            signature,
        });
    }

    if !decoded.text.is_empty() {
        content.push(AnthropicResponseBlock::Text {
            text: decoded.text.clone(),
        });
    }

    content.extend(decoded.tool_calls.iter().map(|call| AnthropicResponseBlock::ToolUse {
        id: call.id.clone(),
        name: call.name.clone(),
        input: call.args.clone(),
    }));

    AnthropicResponse {
        id: id.to_owned(),
        response_type: "message".to_owned(),
        role: "assistant".to_owned(),
        content,
        model: decoded.model.clone(),
        stop_reason: Some(stop_reason(decoded.finish_reason.unwrap_or(FinishReason::Stop)).to_owned()),
        stop_sequence: None,
        usage: usage(decoded.usage),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Thinking,
    Text,
    ToolUse(usize),
}

/// Turns stream events into Anthropic SSE events
///
/// Keeps track of the open content block so that each kind change closes the
/// previous block and opens a new one at the next index.
pub struct AnthropicStreamEncoder {
    id: String,
    model: String,
    expose_signatures: bool,
    started: bool,
    open: Option<(u32, OpenBlock)>,
    next_index: u32,
}

impl AnthropicStreamEncoder {
    pub fn new(id: String, model: String, expose_signatures: bool) -> Self {
        Self {
            id,
            model,
            expose_signatures,
            started: false,
            open: None,
            next_index: 0,
        }
    }

    pub fn encode(&mut self, event: StreamEvent) -> Vec<AnthropicStreamEvent> {
        let mut events = Vec::new();

        if !self.started {
            self.started = true;
            events.push(AnthropicStreamEvent::MessageStart {
                message: AnthropicStreamMessage {
                    id: self.id.clone(),
                    message_type: "message".to_owned(),
                    role: "assistant".to_owned(),
                    model: self.model.clone(),
                    content: Vec::new(),
                    stop_reason: None,
                    usage: AnthropicUsage::default(),
                },
            });
        }

        match event {
            StreamEvent::ReasoningDelta { text, signature } => {
                let signature = signature.filter(|_| self.expose_signatures);
                // A bare signature riding on a text part must not split the text block
                if text.is_empty() && signature.is_none() {
                    return events;
                }

                let index = self.ensure_block(OpenBlock::Thinking, &mut events);
                if !text.is_empty() {
                    events.push(AnthropicStreamEvent::ContentBlockDelta {
                        index,
                        delta: AnthropicStreamDelta::ThinkingDelta { thinking: text },
                    });
                }
                if let Some(signature) = signature {
                    events.push(AnthropicStreamEvent::ContentBlockDelta {
                        index,
                        delta: AnthropicStreamDelta::SignatureDelta { signature },
                    });
                }
            }
            StreamEvent::TextDelta(text) => {
                let index = self.ensure_block(OpenBlock::Text, &mut events);
                events.push(AnthropicStreamEvent::ContentBlockDelta {
                    index,
                    delta: AnthropicStreamDelta::TextDelta { text },
                });
            }
            StreamEvent::ToolCallDelta(call) => self.tool_call(call, &mut events),
            StreamEvent::Done { finish_reason, usage: done_usage } => {
                self.close_block(&mut events);
                events.push(AnthropicStreamEvent::MessageDelta {
                    delta: AnthropicMessageDelta {
                        stop_reason: Some(stop_reason(finish_reason.unwrap_or(FinishReason::Stop)).to_owned()),
                        stop_sequence: None,
                    },
                    usage: Some(usage(done_usage)),
                });
                events.push(AnthropicStreamEvent::MessageStop);
            }
        }

        events
    }

    fn tool_call(&mut self, call: ToolCallDelta, events: &mut Vec<AnthropicStreamEvent>) {
        let continuing = call.id.is_none() && self.open.is_some_and(|(_, kind)| kind == OpenBlock::ToolUse(call.index));

        let index = if continuing {
            self.open.map_or(0, |(index, _)| index)
        } else {
            self.close_block(events);
            let index = self.open_block(OpenBlock::ToolUse(call.index));
            events.push(AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block: AnthropicStreamContentBlock::ToolUse {
                    id: call.id.unwrap_or_else(super::decode::generate_call_id),
                    name: call.name.unwrap_or_default(),
                    input: Value::Object(serde_json::Map::new()),
                },
            });
            index
        };

        if let Some(partial_json) = call.args.filter(|args| !args.is_empty()) {
            events.push(AnthropicStreamEvent::ContentBlockDelta {
                index,
                delta: AnthropicStreamDelta::InputJsonDelta { partial_json },
            });
        }
    }

    fn ensure_block(&mut self, kind: OpenBlock, events: &mut Vec<AnthropicStreamEvent>) -> u32 {
        if let Some((index, open)) = self.open
            && open == kind
        {
            return index;
        }

        self.close_block(events);
        let index = self.open_block(kind);
        let content_block = match kind {
            OpenBlock::Thinking => AnthropicStreamContentBlock::Thinking {
                thinking: String::new(),
            },
            OpenBlock::Text | OpenBlock::ToolUse(_) => AnthropicStreamContentBlock::Text { text: String::new() },
        };
        events.push(AnthropicStreamEvent::ContentBlockStart { index, content_block });
        index
    }

    fn open_block(&mut self, kind: OpenBlock) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        self.open = Some((index, kind));
        index
    }

    fn close_block(&mut self, events: &mut Vec<AnthropicStreamEvent>) {
        if let Some((index, _)) = self.open.take() {
            events.push(AnthropicStreamEvent::ContentBlockStop { index });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use trident_core::SystemClock;

    use super::*;
    use crate::collab::MemoryToolNameRegistry;
    use crate::signature::{SignatureCache, SignaturePolicy};
    use crate::types::{DecodedToolCall, Role};

    fn encode(body: Value) -> CanonicalRequest {
        let request: AnthropicRequest = serde_json::from_value(body).unwrap();
        let cache = SignatureCache::new(SignaturePolicy::default(), Arc::new(SystemClock));
        let registry = MemoryToolNameRegistry::new();
        let context = EncodeContext {
            session_id: "-7",
            signatures: &cache,
            tool_names: &registry,
            default_thinking_budget: 1024,
        };
        request.encode(&context).unwrap()
    }

    #[test]
    fn thinking_block_keeps_explicit_signature() {
        let canonical = encode(json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 512,
            "thinking": {"type": "enabled", "budget_tokens": 4096},
            "system": [{"type": "text", "text": "be nice"}],
            "messages": [
                {"role": "user", "content": "Hi"},
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "hmm", "signature": "client-sig"},
                    {"type": "text", "text": "Hello"}
                ]},
                {"role": "user", "content": "Bye"}
            ]
        }));

        assert_eq!(canonical.thinking.map(|thinking| thinking.budget), Some(4096));
        assert_eq!(canonical.system_instruction.as_deref(), Some("be nice"));
        assert_eq!(canonical.generation.max_output_tokens, Some(512));
        assert_eq!(canonical.contents[1].role, Role::Model);
        assert_eq!(
            canonical.contents[1].parts[0],
            Part::Thought {
                text: "hmm".to_owned(),
                signature: Some("client-sig".to_owned()),
            }
        );
    }

    #[test]
    fn tool_results_share_message_with_trailing_text() {
        let canonical = encode(json!({
            "model": "gemini-2.5-flash",
            "max_tokens": 512,
            "tools": [{"name": "lookup", "input_schema": {"type": "object", "properties": {"q": {"type": "string"}}}}],
            "tool_choice": {"type": "tool", "name": "lookup"},
            "messages": [
                {"role": "user", "content": "find it"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {"q": "x"}},
                    {"type": "tool_use", "id": "toolu_2", "name": "lookup", "input": {"q": "y"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "one"},
                    {"type": "tool_result", "tool_use_id": "toolu_2", "content": [{"type": "text", "text": "two"}]},
                    {"type": "text", "text": "summarize"}
                ]}
            ]
        }));

        assert_eq!(canonical.contents.len(), 3);
        let results = &canonical.contents[2];
        assert_eq!(results.role, Role::User);
        assert_eq!(results.parts.len(), 3);
        assert!(matches!(
            &results.parts[1],
            Part::FunctionResponse { id, name, output } if id == "toolu_2" && name == "lookup" && output["output"] == "two"
        ));
        assert_eq!(results.parts[2], Part::text("summarize"));

        let tool_config = canonical.tool_config.unwrap();
        assert_eq!(tool_config.mode, ToolMode::Any);
        assert_eq!(tool_config.allowed, vec!["lookup"]);
    }

    #[test]
    fn response_blocks_in_order() {
        let decoded = DecodedResponse {
            model: "claude-sonnet-4-5".to_owned(),
            text: "Answer".to_owned(),
            reasoning: "thinking".to_owned(),
            reasoning_signature: Some("sig".to_owned()),
            tool_calls: vec![DecodedToolCall {
                id: "toolu_1".to_owned(),
                name: "lookup".to_owned(),
                args: json!({}),
                signature: None,
            }],
            finish_reason: Some(FinishReason::ToolCalls),
            usage: Some(Usage {
                prompt_tokens: 4,
                completion_tokens: 6,
                total_tokens: 10,
                ..Usage::default()
            }),
        };

        let response = to_anthropic_response(&decoded, "msg_1", true);
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["content"][0]["type"], "thinking");
        assert_eq!(value["content"][0]["signature"], "sig");
        assert_eq!(value["content"][1]["type"], "text");
        assert_eq!(value["content"][2]["type"], "tool_use");
        assert_eq!(value["stop_reason"], "tool_use");
        assert_eq!(value["usage"]["output_tokens"], 6);
    }

    #[test]
    fn stream_opens_and_closes_blocks() {
        let mut encoder = AnthropicStreamEncoder::new("msg_1".to_owned(), "m".to_owned(), true);
        let mut events = Vec::new();

        events.extend(encoder.encode(StreamEvent::ReasoningDelta {
            text: "hmm".to_owned(),
            signature: None,
        }));
        events.extend(encoder.encode(StreamEvent::ReasoningDelta {
            text: String::new(),
            signature: Some("sig".to_owned()),
        }));
        events.extend(encoder.encode(StreamEvent::TextDelta("Hi".to_owned())));
        events.extend(encoder.encode(StreamEvent::ToolCallDelta(ToolCallDelta {
            index: 0,
            id: Some("toolu_1".to_owned()),
            name: Some("lookup".to_owned()),
            args: Some("{\"q\":".to_owned()),
            signature: None,
        })));
        events.extend(encoder.encode(StreamEvent::ToolCallDelta(ToolCallDelta {
            index: 0,
            args: Some("\"x\"}".to_owned()),
            ..ToolCallDelta::default()
        })));
        events.extend(encoder.encode(StreamEvent::Done {
            finish_reason: Some(FinishReason::ToolCalls),
            usage: None,
        }));

        let names: Vec<_> = events.iter().map(AnthropicStreamEvent::event_type).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        let value = serde_json::to_value(&events[3]).unwrap();
        assert_eq!(value["delta"]["type"], "signature_delta");
        let value = serde_json::to_value(&events[8]).unwrap();
        assert_eq!(value["index"], 2);
        assert_eq!(value["content_block"]["type"], "tool_use");
        let value = serde_json::to_value(&events[12]).unwrap();
        assert_eq!(value["delta"]["stop_reason"], "tool_use");
    }

    #[test]
    fn signature_without_reasoning_gets_thinking_block_when_exposed() {
        let decoded = DecodedResponse {
            model: "gemini-3-pro-preview".to_owned(),
            text: "Hello".to_owned(),
            reasoning_signature: Some("sig-on-text".to_owned()),
            finish_reason: Some(FinishReason::Stop),
            ..DecodedResponse::default()
        };

        let value = serde_json::to_value(to_anthropic_response(&decoded, "msg_1", true)).unwrap();
        assert_eq!(value["content"][0]["type"], "thinking");
        assert_eq!(value["content"][0]["thinking"], "");
        assert_eq!(value["content"][0]["signature"], "sig-on-text");
        assert_eq!(value["content"][1]["text"], "Hello");

        let value = serde_json::to_value(to_anthropic_response(&decoded, "msg_1", false)).unwrap();
        assert_eq!(value["content"].as_array().unwrap().len(), 1);
        assert_eq!(value["content"][0]["type"], "text");
    }

    #[test]
    fn hidden_signature_on_text_part_keeps_one_text_block() {
        let mut encoder = AnthropicStreamEncoder::new("msg_1".to_owned(), "m".to_owned(), false);
        let mut events = Vec::new();

        events.extend(encoder.encode(StreamEvent::TextDelta("Hello".to_owned())));
        events.extend(encoder.encode(StreamEvent::ReasoningDelta {
            text: String::new(),
            signature: Some("sig".to_owned()),
        }));
        events.extend(encoder.encode(StreamEvent::TextDelta(" world".to_owned())));
        events.extend(encoder.encode(StreamEvent::Done {
            finish_reason: Some(FinishReason::Stop),
            usage: None,
        }));

        let names: Vec<_> = events.iter().map(AnthropicStreamEvent::event_type).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        let value = serde_json::to_value(&events[3]).unwrap();
        assert_eq!(value["index"], 0);
        assert_eq!(value["delta"]["text"], " world");
    }
}
