use super::response::{FinishReason, Usage};

/// Provider-agnostic streaming event, emitted in upstream byte order
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    /// Reasoning text; a signature-only event carries empty text
    ReasoningDelta { text: String, signature: Option<String> },
    ToolCallDelta(ToolCallDelta),
    Done {
        finish_reason: Option<FinishReason>,
        usage: Option<Usage>,
    },
}

/// Fragment of a tool call
///
/// Fragments sharing an `id` (or, when the id is absent, an `index`) belong
/// to the same call and must be concatenated in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub args: Option<String>,
    pub signature: Option<String>,
}
