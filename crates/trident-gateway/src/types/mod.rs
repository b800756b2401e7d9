//! Canonical types shared by every client protocol
//!
//! Encoders translate client requests into these types and decoders translate
//! upstream results out of them. Nothing here knows about a wire format.

pub mod message;
pub mod request;
pub mod response;
pub mod stream;

pub use message::{CanonicalMessage, Part, Role};
pub use request::{CanonicalRequest, GenerationParams, ThinkingParams, ToolConfig, ToolDefinition, ToolMode};
pub use response::{DecodedResponse, DecodedToolCall, FinishReason, Usage};
pub use stream::{StreamEvent, ToolCallDelta};

/// Model names whose upstream always reasons
pub fn model_thinks(model: &str) -> bool {
    model.ends_with("-thinking") || model == "gemini-2.5-pro" || model.starts_with("gemini-3-pro")
}

/// Models that produce inline images
pub fn is_image_model(model: &str) -> bool {
    model.contains("-image")
}

/// Claude-family models served through the upstream
pub fn is_claude_model(model: &str) -> bool {
    model.starts_with("claude")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thinking_models() {
        assert!(model_thinks("claude-sonnet-4-5-thinking"));
        assert!(model_thinks("gemini-2.5-pro"));
        assert!(model_thinks("gemini-3-pro-preview"));
        assert!(!model_thinks("gemini-2.5-flash"));
        assert!(!model_thinks("claude-sonnet-4-5"));
    }

    #[test]
    fn image_models() {
        assert!(is_image_model("gemini-3-pro-image"));
        assert!(!is_image_model("gemini-2.5-flash"));
    }
}
