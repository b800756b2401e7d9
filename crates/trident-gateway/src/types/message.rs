use serde_json::Value;

/// Author of a canonical message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Client side of the conversation, including tool results
    User,
    /// Upstream model output, including tool calls
    Model,
}

impl Role {
    /// Wire name used by the upstream
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

/// One unit of message content
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text {
        text: String,
    },
    /// Reasoning trace; only ever built with a resolved signature
    Thought {
        text: String,
        signature: Option<String>,
    },
    FunctionCall {
        id: String,
        name: String,
        args: Value,
        signature: Option<String>,
    },
    FunctionResponse {
        id: String,
        name: String,
        output: Value,
    },
    Image {
        mime_type: String,
        data: String,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub const fn is_thought(&self) -> bool {
        matches!(self, Self::Thought { .. })
    }

    pub const fn is_function_response(&self) -> bool {
        matches!(self, Self::FunctionResponse { .. })
    }
}

/// A single conversation turn; part order is significant
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalMessage {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl CanonicalMessage {
    pub const fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }
}
