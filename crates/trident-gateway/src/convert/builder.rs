//! Canonical content assembly shared by every client encoder

use serde_json::{Value, json};

use super::schema::sanitize_tool_name;
use crate::collab::ToolNameRegistry;
use crate::signature::ResolvedSignatures;
use crate::types::{CanonicalMessage, Part, Role};

/// An assistant turn as the client sent it
#[derive(Debug, Clone, Default)]
pub struct ModelTurn {
    pub text: String,
    pub reasoning: Option<String>,
    /// Signature echoed back by the client
    pub reasoning_signature: Option<String>,
    pub tool_calls: Vec<TurnToolCall>,
}

/// A tool call inside an assistant turn
#[derive(Debug, Clone)]
pub struct TurnToolCall {
    pub id: String,
    /// Client name, sanitized by the builder
    pub name: String,
    pub args: Value,
    pub signature: Option<String>,
}

/// Builds the canonical `contents` list for one exchange
///
/// Signatures are resolved once, before the builder exists, and every model
/// turn draws from that snapshot.
pub struct ContentBuilder<'a> {
    model: &'a str,
    thinking_enabled: bool,
    signatures: ResolvedSignatures,
    tool_names: &'a dyn ToolNameRegistry,
    contents: Vec<CanonicalMessage>,
}

impl<'a> ContentBuilder<'a> {
    pub fn new(
        model: &'a str,
        thinking_enabled: bool,
        signatures: ResolvedSignatures,
        tool_names: &'a dyn ToolNameRegistry,
    ) -> Self {
        Self {
            model,
            thinking_enabled,
            signatures,
            tool_names,
            contents: Vec::new(),
        }
    }

    /// Append a user turn; never produces an empty part list
    pub fn push_user(&mut self, text: &str, images: Vec<Part>) {
        let mut parts = images;
        if !text.is_empty() {
            parts.push(Part::text(text));
        }
        if parts.is_empty() {
            parts.push(Part::text(" "));
        }

        self.contents.push(CanonicalMessage::new(Role::User, parts));
    }

    /// Add text and images to the user message that holds the latest tool results
    pub fn extend_tool_results(&mut self, text: &str, images: Vec<Part>) {
        match self.contents.last_mut() {
            Some(last) if last.role == Role::User && last.parts.iter().any(Part::is_function_response) => {
                last.parts.extend(images);
                if !text.is_empty() {
                    last.parts.push(Part::text(text));
                }
            }
            _ => self.push_user(text, images),
        }
    }

    /// Append an assistant turn
    ///
    /// A turn with no text but with tool calls that directly follows another
    /// model message is merged into it.
    pub fn push_model(&mut self, turn: ModelTurn) {
        let text_blank = turn.text.trim().is_empty();
        let merge = text_blank
            && !turn.tool_calls.is_empty()
            && self.contents.last().is_some_and(|last| last.role == Role::Model);

        let mut parts = Vec::with_capacity(turn.tool_calls.len() + 2);

        if !merge && let Some(thought) = self.thought_part(turn.reasoning, turn.reasoning_signature) {
            parts.push(thought);
        }

        if !text_blank {
            parts.push(Part::text(turn.text));
        }

        for call in turn.tool_calls {
            parts.push(self.function_call_part(call));
        }

        if merge {
            if let Some(last) = self.contents.last_mut() {
                last.parts.extend(parts);
            }
            return;
        }

        if parts.is_empty() {
            parts.push(Part::text(" "));
        }

        self.contents.push(CanonicalMessage::new(Role::Model, parts));
    }

    /// Append a tool result, recovering the call's name from earlier model turns
    ///
    /// Consecutive results share one user message.
    pub fn push_tool_result(&mut self, call_id: &str, output: String) {
        let name = self.call_name(call_id).unwrap_or_else(|| call_id.to_owned());
        self.push_function_response(call_id.to_owned(), name, json!({ "output": output }));
    }

    /// Append a function response whose name is already known
    pub fn push_function_response(&mut self, id: String, name: String, output: Value) {
        let part = Part::FunctionResponse { id, name, output };

        match self.contents.last_mut() {
            Some(last) if last.role == Role::User && last.parts.last().is_some_and(Part::is_function_response) => {
                last.parts.push(part);
            }
            _ => self.contents.push(CanonicalMessage::new(Role::User, vec![part])),
        }
    }

    pub fn finish(self) -> Vec<CanonicalMessage> {
        self.contents
    }

    /// Thought part for a model turn, or nothing when no signature resolves
    fn thought_part(&self, reasoning: Option<String>, explicit: Option<String>) -> Option<Part> {
        if !self.thinking_enabled {
            return None;
        }

        let (signature, cached) = match explicit.filter(|signature| !signature.is_empty()) {
            Some(signature) => (signature, false),
            None => match &self.signatures.reasoning {
                Some(signature) => (signature.clone(), true),
                None => (self.signatures.fallback.clone()?, false),
            },
        };

        let text = reasoning
            .filter(|text| !text.is_empty())
            .or_else(|| cached.then(|| self.signatures.reasoning_text.clone()).flatten())
            .unwrap_or_else(|| " ".to_owned());

        Some(Part::Thought {
            text,
            signature: Some(signature),
        })
    }

    fn function_call_part(&self, call: TurnToolCall) -> Part {
        let sanitized = sanitize_tool_name(&call.name);
        if sanitized != call.name {
            self.tool_names.register(self.model, &sanitized, &call.name);
        }

        let signature = if self.thinking_enabled {
            call.signature
                .filter(|signature| !signature.is_empty())
                .or_else(|| self.signatures.tool_or_fallback().map(str::to_owned))
        } else {
            None
        };

        Part::FunctionCall {
            id: call.id,
            name: sanitized.into_owned(),
            args: call.args,
            signature,
        }
    }

    fn call_name(&self, call_id: &str) -> Option<String> {
        self.contents
            .iter()
            .rev()
            .filter(|message| message.role == Role::Model)
            .flat_map(|message| message.parts.iter())
            .find_map(|part| match part {
                Part::FunctionCall { id, name, .. } if id == call_id => Some(name.clone()),
                _ => None,
            })
    }
}
