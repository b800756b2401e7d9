//! Wire format types for each client protocol and the upstream

pub mod anthropic;
pub mod gemini;
pub mod openai;
