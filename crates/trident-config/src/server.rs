use std::net::SocketAddr;

use secrecy::SecretString;
use serde::Deserialize;

use crate::health::HealthConfig;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub listen_address: Option<SocketAddr>,
    /// Key clients must present; unset leaves the API open
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default)]
    pub health: HealthConfig,
}
