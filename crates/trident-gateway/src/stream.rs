//! Streaming decode of the upstream SSE body
//!
//! Raw chunks from a [`StreamingResponse`] are split into complete lines,
//! each line is decoded into [`StreamEvent`]s, and the thought signature seen
//! along the way is written to the [`SignatureCache`] once the stream closes
//! successfully.

use std::pin::Pin;
use std::sync::Arc;

use bytes::BytesMut;
use futures_util::Stream;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::collab::{DebugSink, ImageStore, ToolNameRegistry};
use crate::convert::decode::{DecodeContext, generate_call_id, usage_from_upstream};
use crate::error::GatewayError;
use crate::protocol::gemini::GeminiResponse;
use crate::signature::{SignatureCache, WriteContext};
use crate::transport::StreamingResponse;
use crate::types::{DecodedToolCall, FinishReason, StreamEvent, ToolCallDelta, Usage, is_image_model};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, GatewayError>> + Send>>;

const CHANNEL_CAPACITY: usize = 64;

/// Splits a byte stream into complete lines
///
/// Bytes after the last newline are held until more data arrives, so a line
/// is never decoded partially.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: BytesMut,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&byte| byte == b'\n') {
            let line = self.pending.split_to(newline + 1);
            lines.push(decode_line(&line[..newline]));
        }
        lines
    }

    /// Whatever is left once the stream ended
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = self.pending.split();
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let line = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(line).into_owned()
}

#[derive(Debug)]
struct PendingCall {
    index: usize,
    id: Option<String>,
    name: String,
    args: String,
    signature: Option<String>,
}

/// Reassembles tool calls from fragments
///
/// A fragment with an id continues the call with that id or starts a new
/// one; a fragment without an id continues the latest call at its index.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    calls: Vec<PendingCall>,
}

impl ToolCallAssembler {
    pub fn apply(&mut self, delta: &ToolCallDelta) {
        let existing = match &delta.id {
            Some(id) => self.calls.iter().position(|call| call.id.as_ref() == Some(id)),
            None => self.calls.iter().rposition(|call| call.index == delta.index),
        };

        let call = if let Some(position) = existing {
            &mut self.calls[position]
        } else {
            self.calls.push(PendingCall {
                index: delta.index,
                id: delta.id.clone(),
                name: String::new(),
                args: String::new(),
                signature: None,
            });
            let last = self.calls.len() - 1;
            &mut self.calls[last]
        };

        if let Some(name) = &delta.name {
            call.name.push_str(name);
        }
        if let Some(args) = &delta.args {
            call.args.push_str(args);
        }
        if delta.signature.is_some() {
            call.signature.clone_from(&delta.signature);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Drain the assembled calls in first-seen order
    pub fn take_completed(&mut self) -> Vec<DecodedToolCall> {
        self.calls
            .drain(..)
            .map(|call| {
                let args = if call.args.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&call.args).unwrap_or_else(|e| {
                        tracing::debug!(error = %e, name = %call.name, "assembled tool arguments are not valid JSON");
                        json!({})
                    })
                };

                DecodedToolCall {
                    id: call.id.unwrap_or_else(generate_call_id),
                    name: call.name,
                    args,
                    signature: call.signature,
                }
            })
            .collect()
    }
}

/// Lifecycle of a [`StreamMachine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Active,
    Closed { ok: bool },
}

/// Everything the machine needs to decode and to write the cache
#[derive(Clone)]
pub struct StreamContext {
    pub model: String,
    pub session_id: String,
    pub signatures: Arc<SignatureCache>,
    pub tool_names: Arc<dyn ToolNameRegistry>,
    pub images: Arc<dyn ImageStore>,
}

/// Decodes upstream SSE lines into [`StreamEvent`]s
pub struct StreamMachine {
    context: StreamContext,
    state: MachineState,
    lines: LineBuffer,
    reasoning: String,
    reasoning_signature: Option<String>,
    tool_signature: Option<String>,
    tool_calls: usize,
    text_emitted: bool,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

impl StreamMachine {
    pub fn new(context: StreamContext) -> Self {
        Self {
            context,
            state: MachineState::Active,
            lines: LineBuffer::default(),
            reasoning: String::new(),
            reasoning_signature: None,
            tool_signature: None,
            tool_calls: 0,
            text_emitted: false,
            finish_reason: None,
            usage: None,
        }
    }

    pub const fn state(&self) -> MachineState {
        self.state
    }

    /// Decode every complete line in `chunk`
    ///
    /// An upstream error object ends the stream with an error; the caller
    /// must then call [`fail`](Self::fail).
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>, GatewayError> {
        if self.state != MachineState::Active {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        for line in self.lines.push(chunk) {
            self.decode_line(&line, &mut events)?;
        }
        Ok(events)
    }

    /// Close successfully: flush the last line, emit `Done`, write the cache
    pub fn finish(&mut self) -> Result<Vec<StreamEvent>, GatewayError> {
        if self.state != MachineState::Active {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        if let Some(line) = self.lines.take_remainder() {
            self.decode_line(&line, &mut events)?;
        }

        self.state = MachineState::Closed { ok: true };
        self.write_cache();

        let finish_reason = if self.tool_calls > 0 {
            Some(FinishReason::ToolCalls)
        } else {
            self.finish_reason
        };
        events.push(StreamEvent::Done {
            finish_reason,
            usage: self.usage,
        });

        Ok(events)
    }

    /// Close after an error, dropping buffered state without a cache write
    pub fn fail(&mut self) {
        self.state = MachineState::Closed { ok: false };
        self.lines = LineBuffer::default();
        self.reasoning.clear();
        self.reasoning_signature = None;
        self.tool_signature = None;
    }

    fn decode_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) -> Result<(), GatewayError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') || line.starts_with("event:") {
            return Ok(());
        }

        let payload = line.strip_prefix("data:").map_or(line, str::trim_start);
        if payload == "[DONE]" {
            return Ok(());
        }

        let value: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, line = payload, "skipping unparseable stream line");
                return Ok(());
            }
        };

        if let Some(error) = value.get("error") {
            let status = error
                .get("code")
                .and_then(Value::as_u64)
                .and_then(|code| u16::try_from(code).ok())
                .unwrap_or(500);
            return Err(GatewayError::Upstream {
                status,
                body: payload.to_owned(),
            });
        }

        let response = match GeminiResponse::from_upstream(value) {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(error = %e, "skipping stream line with unexpected shape");
                return Ok(());
            }
        };

        self.decode_response(&response, events);
        Ok(())
    }

    fn decode_response(&mut self, response: &GeminiResponse, events: &mut Vec<StreamEvent>) {
        let context = DecodeContext {
            model: &self.context.model,
            tool_names: self.context.tool_names.as_ref(),
            images: self.context.images.as_ref(),
        };

        for part in response.parts() {
            if let Some(call) = &part.function_call {
                let call = context.tool_call(call, part.thought_signature.clone());
                if call.signature.is_some() {
                    self.tool_signature.clone_from(&call.signature);
                }
                events.push(StreamEvent::ToolCallDelta(ToolCallDelta {
                    index: self.tool_calls,
                    id: Some(call.id),
                    name: Some(call.name),
                    args: Some(call.args.to_string()),
                    signature: call.signature,
                }));
                self.tool_calls += 1;
                continue;
            }

            if let Some(inline) = &part.inline_data {
                if let Some(link) = context.image_markdown(&inline.data, &inline.mime_type) {
                    let mut text = if self.text_emitted { "\n\n".to_owned() } else { String::new() };
                    text.push_str(&link);
                    self.text_emitted = true;
                    events.push(StreamEvent::TextDelta(text));
                }
                continue;
            }

            let text = part.text.clone().unwrap_or_default();
            if part.is_thought() {
                self.reasoning.push_str(&text);
                if part.thought_signature.is_some() {
                    self.reasoning_signature.clone_from(&part.thought_signature);
                }
                events.push(StreamEvent::ReasoningDelta {
                    text,
                    signature: part.thought_signature.clone(),
                });
                continue;
            }

            if part.thought_signature.is_some() {
                self.reasoning_signature.clone_from(&part.thought_signature);
                events.push(StreamEvent::ReasoningDelta {
                    text: String::new(),
                    signature: part.thought_signature.clone(),
                });
            }

            if !text.is_empty() {
                self.text_emitted = true;
                events.push(StreamEvent::TextDelta(text));
            }
        }

        if let Some(reason) = response.finish_reason() {
            self.finish_reason = Some(FinishReason::from_upstream(reason));
        }
        if let Some(metadata) = &response.usage_metadata {
            self.usage = Some(usage_from_upstream(metadata));
        }
    }

    fn write_cache(&self) {
        let has_tools = self.tool_calls > 0;
        let signature = if has_tools {
            self.tool_signature.as_ref().or(self.reasoning_signature.as_ref())
        } else {
            self.reasoning_signature.as_ref()
        };

        let Some(signature) = signature else {
            return;
        };

        self.context.signatures.set(
            &self.context.session_id,
            &self.context.model,
            signature,
            &self.reasoning,
            WriteContext {
                has_tools,
                is_image_model: is_image_model(&self.context.model),
            },
        );
    }
}

/// Drive a machine over a streaming response on a background task
///
/// Dropping the returned stream cancels the exchange; a canceled or failed
/// exchange never writes the cache.
pub fn pump(
    mut response: StreamingResponse,
    mut machine: StreamMachine,
    debug: Arc<dyn DebugSink>,
    correlation_id: String,
) -> EventStream {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        loop {
            let chunk = tokio::select! {
                biased;

                () = tx.closed() => {
                    response.cancel();
                    machine.fail();
                    tracing::debug!(correlation_id, "stream consumer went away, canceling exchange");
                    return;
                }

                chunk = response.next_chunk() => chunk,
            };

            let (result, last) = match chunk {
                Some(Ok(chunk)) => {
                    debug.stream_chunk(&correlation_id, &chunk.data);
                    (machine.feed(&chunk.data), false)
                }
                Some(Err(e)) => (Err(GatewayError::from(e)), true),
                None => (machine.finish(), true),
            };

            let failed = result.is_err();
            if failed {
                machine.fail();
                response.cancel();
            }
            if !send_all(&tx, result).await || failed || last {
                return;
            }
        }
    });

    Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

/// Forward events (or the error) to the consumer; false once it is gone
async fn send_all(
    tx: &mpsc::Sender<Result<StreamEvent, GatewayError>>,
    result: Result<Vec<StreamEvent>, GatewayError>,
) -> bool {
    match result {
        Ok(events) => {
            for event in events {
                if tx.send(Ok(event)).await.is_err() {
                    return false;
                }
            }
            true
        }
        Err(e) => tx.send(Err(e)).await.is_ok(),
    }
}
