use serde_json::Value;

/// Why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

impl FinishReason {
    /// Map an upstream `finishReason`
    pub fn from_upstream(reason: &str) -> Self {
        match reason {
            "MAX_TOKENS" => Self::Length,
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" | "IMAGE_SAFETY" => {
                Self::ContentFilter
            }
            _ => Self::Stop,
        }
    }
}

/// Token accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    /// Reasoning tokens, already included in `completion_tokens`
    pub thoughts_tokens: u32,
    pub cached_tokens: u32,
}

/// A completed tool call from the upstream
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedToolCall {
    pub id: String,
    /// Client-facing (unsanitized) name
    pub name: String,
    pub args: Value,
    pub signature: Option<String>,
}

/// Upstream response reduced to what client encoders need
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedResponse {
    pub model: String,
    /// Visible text, with Markdown image links appended
    pub text: String,
    pub reasoning: String,
    pub reasoning_signature: Option<String>,
    pub tool_calls: Vec<DecodedToolCall>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
}

impl DecodedResponse {
    /// Signature worth remembering for the next turn
    ///
    /// The last tool call's signature wins over the reasoning signature.
    pub fn cacheable_signature(&self) -> Option<&str> {
        self.tool_calls
            .iter()
            .rev()
            .find_map(|call| call.signature.as_deref())
            .or(self.reasoning_signature.as_deref())
    }
}
