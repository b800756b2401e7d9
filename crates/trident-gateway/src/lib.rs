//! Protocol gateway for Trident
//!
//! Translates `OpenAI`, Anthropic and Gemini-native client requests into a
//! single canonical model, executes them against the Gemini `v1internal`
//! upstream through an external TLS client process, and translates the
//! results back. Thought signatures issued by the upstream are carried across
//! turns by the [`SignatureCache`].

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod collab;
pub mod convert;
pub mod error;
pub mod gateway;
#[cfg(feature = "http")]
pub mod handler;
pub mod models;
pub mod protocol;
pub mod signature;
pub mod stream;
pub mod transport;
pub mod types;
pub mod upstream;

pub use error::GatewayError;
pub use gateway::{EventStream, Gateway};
#[cfg(feature = "http")]
pub use handler::gateway_router;
pub use signature::{SignatureCache, SignaturePolicy};
pub use transport::{HttpTransport, ProcessTransport, TransportError};
pub use types::{CanonicalMessage, CanonicalRequest, DecodedResponse, Part, Role, StreamEvent};
