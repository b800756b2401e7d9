use serde_json::Value;

use super::message::CanonicalMessage;

/// Tool declaration in upstream form
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    /// Sanitized name; the client's original is kept by the name registry
    pub name: String,
    pub description: Option<String>,
    /// Cleaned JSON Schema object
    pub parameters: Value,
}

/// Function calling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolMode {
    Auto,
    Any,
    None,
}

impl ToolMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Any => "ANY",
            Self::None => "NONE",
        }
    }
}

/// Function calling configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    pub mode: ToolMode,
    /// Restricts `Any` to these (sanitized) names
    pub allowed: Vec<String>,
}

/// Sampling parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationParams {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub max_output_tokens: Option<u32>,
    pub stop_sequences: Vec<String>,
}

/// Reasoning configuration, present only when thinking is enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkingParams {
    pub budget: u32,
}

/// A client request translated into upstream vocabulary
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRequest {
    pub model: String,
    pub contents: Vec<CanonicalMessage>,
    pub system_instruction: Option<String>,
    pub tools: Vec<ToolDefinition>,
    pub tool_config: Option<ToolConfig>,
    pub generation: GenerationParams,
    pub thinking: Option<ThinkingParams>,
    pub stream: bool,
}

impl CanonicalRequest {
    pub const fn thinking_enabled(&self) -> bool {
        self.thinking.is_some()
    }

    pub fn tools_present(&self) -> bool {
        !self.tools.is_empty()
    }
}
