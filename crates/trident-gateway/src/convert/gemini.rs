//! Conversion between canonical types and the Gemini wire format
//!
//! Covers both directions of the Gemini-native client protocol and the
//! outbound `v1internal` envelope.

use super::builder::{ContentBuilder, ModelTurn, TurnToolCall};
use super::{EncodeContext, EncodeRequest, ThinkingRequest, thinking_params, tool_definition};
use crate::error::GatewayError;
use crate::protocol::gemini::{
    GeminiCandidate, GeminiContent, GeminiFunctionCall, GeminiFunctionCallingConfig, GeminiFunctionDeclaration,
    GeminiFunctionResponse, GeminiGenerationConfig, GeminiInlineData, GeminiPart, GeminiRequest, GeminiResponse,
    GeminiThinkingConfig, GeminiTool, GeminiToolConfig, GeminiUsageMetadata, UpstreamEnvelope, UpstreamRequest,
};
use crate::stream::ToolCallAssembler;
use crate::types::{
    CanonicalMessage, CanonicalRequest, DecodedResponse, DecodedToolCall, FinishReason, GenerationParams, Part,
    StreamEvent, ToolConfig, ToolMode, Usage, is_claude_model,
};

// -- Outbound: canonical -> upstream envelope --

/// Wrap a canonical request in the `v1internal` envelope
///
/// Every call gets a fresh `requestId`.
pub fn envelope(request: &CanonicalRequest, project: &str, session_id: &str) -> UpstreamEnvelope {
    let tools = if request.tools.is_empty() {
        Vec::new()
    } else {
        vec![GeminiTool {
            function_declarations: request
                .tools
                .iter()
                .map(|tool| GeminiFunctionDeclaration {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: Some(tool.parameters.clone()),
                })
                .collect(),
        }]
    };

    UpstreamEnvelope {
        project: project.to_owned(),
        request_id: format!("agent-{}", uuid::Uuid::new_v4()),
        model: request.model.clone(),
        request: UpstreamRequest {
            contents: request.contents.iter().map(GeminiContent::from).collect(),
            tools,
            tool_config: request.tool_config.as_ref().map(GeminiToolConfig::from),
            generation_config: generation_config(request),
            session_id: session_id.to_owned(),
            system_instruction: request.system_instruction.as_ref().map(|text| GeminiContent {
                role: Some("user".to_owned()),
                parts: vec![GeminiPart {
                    text: Some(text.clone()),
                    ..GeminiPart::default()
                }],
            }),
        },
    }
}

fn generation_config(request: &CanonicalRequest) -> GeminiGenerationConfig {
    let params = &request.generation;
    let drop_top_p = request.thinking_enabled() && is_claude_model(&request.model);

    GeminiGenerationConfig {
        temperature: params.temperature,
        top_p: params.top_p.filter(|_| !drop_top_p),
        top_k: params.top_k,
        max_output_tokens: params.max_output_tokens,
        stop_sequences: params.stop_sequences.clone(),
        thinking_config: request.thinking.map(|thinking| GeminiThinkingConfig {
            include_thoughts: true,
            thinking_budget: Some(i64::from(thinking.budget)),
        }),
    }
}

impl From<&CanonicalMessage> for GeminiContent {
    fn from(message: &CanonicalMessage) -> Self {
        Self {
            role: Some(message.role.as_str().to_owned()),
            parts: message.parts.iter().map(GeminiPart::from).collect(),
        }
    }
}

impl From<&Part> for GeminiPart {
    fn from(part: &Part) -> Self {
        match part {
            Part::Text { text } => Self {
                text: Some(text.clone()),
                ..Self::default()
            },
            Part::Thought { text, signature } => Self {
                text: Some(text.clone()),
                thought: Some(true),
                thought_signature: signature.clone(),
                ..Self::default()
            },
            Part::FunctionCall {
                id,
                name,
                args,
                signature,
            } => Self {
                function_call: Some(GeminiFunctionCall {
                    id: Some(id.clone()),
                    name: name.clone(),
                    args: args.clone(),
                }),
                thought_signature: signature.clone(),
                ..Self::default()
            },
            Part::FunctionResponse { id, name, output } => Self {
                function_response: Some(GeminiFunctionResponse {
                    id: Some(id.clone()),
                    name: name.clone(),
                    response: output.clone(),
                }),
                ..Self::default()
            },
            Part::Image { mime_type, data } => Self {
                inline_data: Some(GeminiInlineData {
                    mime_type: mime_type.clone(),
                    data: data.clone(),
                }),
                ..Self::default()
            },
        }
    }
}

impl From<&ToolConfig> for GeminiToolConfig {
    fn from(config: &ToolConfig) -> Self {
        Self {
            function_calling_config: GeminiFunctionCallingConfig {
                mode: config.mode.as_str().to_owned(),
                allowed_function_names: config.allowed.clone(),
            },
        }
    }
}

// -- Inbound: Gemini-native client request -> canonical --

/// Gemini-native request together with the model and action from its path
#[derive(Debug, Clone)]
pub struct GeminiNativeRequest {
    pub model: String,
    pub stream: bool,
    pub body: GeminiRequest,
}

impl EncodeRequest for GeminiNativeRequest {
    fn model(&self) -> &str {
        &self.model
    }

    fn is_stream(&self) -> bool {
        self.stream
    }

    fn encode(self, context: &EncodeContext<'_>) -> Result<CanonicalRequest, GatewayError> {
        let Self { model, stream, body } = self;
        let config = body.generation_config.unwrap_or_default();

        let thinking = thinking_params(
            &model,
            thinking_request(config.thinking_config.as_ref()),
            context.default_thinking_budget,
        );

        let tools = body
            .tools
            .into_iter()
            .flat_map(|tool| tool.function_declarations)
            .map(|declaration| {
                tool_definition(
                    context,
                    &model,
                    &declaration.name,
                    declaration.description,
                    declaration.parameters,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let signatures = context.signatures.resolve(context.session_id, &model, !tools.is_empty());
        let mut builder = ContentBuilder::new(&model, thinking.is_some(), signatures, context.tool_names);

        for content in body.contents {
            if content.role.as_deref() == Some("model") {
                builder.push_model(model_turn(content.parts));
            } else {
                push_user_content(&mut builder, content.parts);
            }
        }

        let contents = builder.finish();

        Ok(CanonicalRequest {
            contents,
            system_instruction: body.system_instruction.map(|content| content_text(&content.parts)),
            tool_config: body.tool_config.map(|config| tool_config(&config.function_calling_config)),
            generation: GenerationParams {
                temperature: config.temperature,
                top_p: config.top_p,
                top_k: config.top_k,
                max_output_tokens: config.max_output_tokens,
                stop_sequences: config.stop_sequences,
            },
            tools,
            thinking,
            stream,
            model,
        })
    }
}

fn thinking_request(config: Option<&GeminiThinkingConfig>) -> ThinkingRequest {
    match config {
        None => ThinkingRequest::Unspecified,
        Some(GeminiThinkingConfig {
            thinking_budget: Some(0),
            ..
        }) => ThinkingRequest::Disabled,
        Some(config) => ThinkingRequest::Enabled {
            budget: config
                .thinking_budget
                .and_then(|budget| u32::try_from(budget).ok()),
        },
    }
}

fn model_turn(parts: Vec<GeminiPart>) -> ModelTurn {
    let mut turn = ModelTurn::default();
    let mut reasoning = String::new();

    for part in parts {
        if let Some(call) = part.function_call {
            turn.tool_calls.push(TurnToolCall {
                id: call.id.unwrap_or_else(|| call.name.clone()),
                name: call.name,
                args: call.args,
                signature: part.thought_signature,
            });
            continue;
        }

        if part.thought_signature.is_some() {
            turn.reasoning_signature = part.thought_signature;
        }

        if let Some(text) = part.text {
            if matches!(part.thought, Some(true)) {
                reasoning.push_str(&text);
            } else {
                turn.text.push_str(&text);
            }
        }
    }

    turn.reasoning = (!reasoning.is_empty()).then_some(reasoning);
    turn
}

fn push_user_content(builder: &mut ContentBuilder<'_>, parts: Vec<GeminiPart>) {
    let mut text = String::new();
    let mut images = Vec::new();
    let mut had_responses = false;

    for part in parts {
        if let Some(response) = part.function_response {
            let name = super::schema::sanitize_tool_name(&response.name).into_owned();
            builder.push_function_response(
                response.id.unwrap_or_else(|| response.name.clone()),
                name,
                response.response,
            );
            had_responses = true;
        } else if let Some(inline) = part.inline_data {
            images.push(Part::Image {
                mime_type: inline.mime_type,
                data: inline.data,
            });
        } else if let Some(part_text) = part.text {
            text.push_str(&part_text);
        }
    }

    if !had_responses {
        builder.push_user(&text, images);
    } else if !text.is_empty() || !images.is_empty() {
        builder.extend_tool_results(&text, images);
    }
}

fn content_text(parts: &[GeminiPart]) -> String {
    parts
        .iter()
        .filter_map(|part| part.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n")
}

fn tool_config(config: &GeminiFunctionCallingConfig) -> ToolConfig {
    let mode = match config.mode.to_ascii_uppercase().as_str() {
        "ANY" | "VALIDATED" => ToolMode::Any,
        "NONE" => ToolMode::None,
        _ => ToolMode::Auto,
    };

    ToolConfig {
        mode,
        allowed: config
            .allowed_function_names
            .iter()
            .map(|name| super::schema::sanitize_tool_name(name).into_owned())
            .collect(),
    }
}

// -- Outbound: decoded -> Gemini-native client response --

/// Build the client response for a buffered exchange
pub fn to_gemini_response(decoded: &DecodedResponse, expose_signatures: bool) -> GeminiResponse {
    let mut parts = Vec::new();

    let signature = decoded.reasoning_signature.clone().filter(|_| expose_signatures);
    if !decoded.reasoning.is_empty() || signature.is_some() {
        parts.push(GeminiPart {
            text: Some(decoded.reasoning.clone()),
            thought: Some(true),
            thought_signature: signature,
            ..GeminiPart::default()
        });
    }

    if !decoded.text.is_empty() {
        parts.push(GeminiPart {
            text: Some(decoded.text.clone()),
            ..GeminiPart::default()
        });
    }

    parts.extend(
        decoded
            .tool_calls
            .iter()
            .map(|call| function_call_part(call, expose_signatures)),
    );

    response_with(parts, decoded.finish_reason, decoded.usage)
}

fn function_call_part(call: &DecodedToolCall, expose_signatures: bool) -> GeminiPart {
    GeminiPart {
        function_call: Some(GeminiFunctionCall {
            id: Some(call.id.clone()),
            name: call.name.clone(),
            args: call.args.clone(),
        }),
        thought_signature: call.signature.clone().filter(|_| expose_signatures),
        ..GeminiPart::default()
    }
}

fn response_with(parts: Vec<GeminiPart>, finish_reason: Option<FinishReason>, usage: Option<Usage>) -> GeminiResponse {
    GeminiResponse {
        candidates: vec![GeminiCandidate {
            content: Some(GeminiContent {
                role: Some("model".to_owned()),
                parts,
            }),
            finish_reason: finish_reason.map(|reason| finish_reason_name(reason).to_owned()),
            index: Some(0),
        }],
        usage_metadata: usage.map(|usage| GeminiUsageMetadata {
            prompt_token_count: usage.prompt_tokens,
            candidates_token_count: usage.completion_tokens.saturating_sub(usage.thoughts_tokens),
            total_token_count: usage.total_tokens,
            thoughts_token_count: (usage.thoughts_tokens > 0).then_some(usage.thoughts_tokens),
            cached_content_token_count: (usage.cached_tokens > 0).then_some(usage.cached_tokens),
        }),
        model_version: None,
        response_id: None,
    }
}

const fn finish_reason_name(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop | FinishReason::ToolCalls => "STOP",
        FinishReason::Length => "MAX_TOKENS",
        FinishReason::ContentFilter => "SAFETY",
    }
}

/// Turns stream events into Gemini-native streaming chunks
///
/// Tool calls are only complete at the end of the stream, so they are held
/// back and sent with the final chunk.
pub struct GeminiStreamEncoder {
    expose_signatures: bool,
    tool_calls: ToolCallAssembler,
}

impl GeminiStreamEncoder {
    pub fn new(expose_signatures: bool) -> Self {
        Self {
            expose_signatures,
            tool_calls: ToolCallAssembler::default(),
        }
    }

    pub fn encode(&mut self, event: StreamEvent) -> Option<GeminiResponse> {
        match event {
            StreamEvent::TextDelta(text) => Some(response_with(
                vec![GeminiPart {
                    text: Some(text),
                    ..GeminiPart::default()
                }],
                None,
                None,
            )),
            StreamEvent::ReasoningDelta { text, signature } => {
                let signature = signature.filter(|_| self.expose_signatures);
                if text.is_empty() && signature.is_none() {
                    return None;
                }
                Some(response_with(
                    vec![GeminiPart {
                        text: Some(text),
                        thought: Some(true),
                        thought_signature: signature,
                        ..GeminiPart::default()
                    }],
                    None,
                    None,
                ))
            }
            StreamEvent::ToolCallDelta(delta) => {
                self.tool_calls.apply(&delta);
                None
            }
            StreamEvent::Done { finish_reason, usage } => {
                let parts = self
                    .tool_calls
                    .take_completed()
                    .iter()
                    .map(|call| function_call_part(call, self.expose_signatures))
                    .collect();
                Some(response_with(parts, finish_reason, usage))
            }
        }
    }
}
