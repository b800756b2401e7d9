#![allow(clippy::must_use_candidate)]

pub mod accounts;
pub mod debug;
mod env;
pub mod health;
mod loader;
pub mod server;
pub mod signatures;
pub mod telemetry;
pub mod thinking;
pub mod transport;
pub mod upstream;

use serde::Deserialize;

pub use accounts::*;
pub use debug::*;
pub use health::*;
pub use server::*;
pub use signatures::*;
pub use telemetry::*;
pub use thinking::*;
pub use transport::*;
pub use upstream::*;

/// Top-level Trident configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Client-facing HTTP server
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream endpoint and fixed request headers
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// External TLS client process
    #[serde(default)]
    pub transport: TransportConfig,
    /// Thought-signature trust policies
    #[serde(default)]
    pub signatures: SignatureConfig,
    /// Reasoning defaults
    #[serde(default)]
    pub thinking: ThinkingConfig,
    /// Upstream accounts handed out by the token source
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    /// Debug dumps of raw exchanges
    #[serde(default)]
    pub debug: DebugConfig,
    /// Logging configuration
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}
