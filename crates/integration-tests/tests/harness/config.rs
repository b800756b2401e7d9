//! Programmatic configuration builder for integration tests

use std::net::SocketAddr;

use secrecy::SecretString;
use trident_config::{AccountConfig, Config, HealthConfig, ServerConfig, TransportConfig};

use super::mock_upstream::MockUpstream;

/// Builder for constructing test configurations
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// One account, with the transport process pointed at the scripted upstream
    pub fn new(upstream: &MockUpstream) -> Self {
        Self {
            config: Config {
                server: ServerConfig {
                    listen_address: Some(SocketAddr::from(([127, 0, 0, 1], 0))),
                    health: HealthConfig {
                        enabled: true,
                        ..HealthConfig::default()
                    },
                    ..ServerConfig::default()
                },
                transport: TransportConfig {
                    binary: "/bin/sh".into(),
                    args: vec![upstream.script().display().to_string()],
                    ..TransportConfig::default()
                },
                accounts: vec![AccountConfig {
                    access_token: SecretString::from("upstream-token"),
                    project_id: "test-project".to_owned(),
                    session_id: Some("-4242".to_owned()),
                }],
                ..Config::default()
            },
        }
    }

    /// Require clients to present `key`
    pub fn with_api_key(mut self, key: &str) -> Self {
        self.config.server.api_key = Some(SecretString::from(key.to_owned()));
        self
    }

    /// Send thought signatures back to clients
    pub fn with_exposed_signatures(mut self) -> Self {
        self.config.signatures.expose_to_clients = true;
        self
    }

    /// Disable health endpoint
    pub fn without_health(mut self) -> Self {
        self.config.server.health.enabled = false;
        self
    }

    /// Build the final config
    pub fn build(self) -> Config {
        self.config
    }
}
