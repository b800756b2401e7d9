use std::path::PathBuf;

use serde::Deserialize;

/// External TLS client process configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Executable spawned once per upstream exchange
    #[serde(default = "default_binary")]
    pub binary: PathBuf,
    /// Extra arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,
    /// Path forwarded to the process as `config_path`
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    /// Outbound proxy the process should use
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            args: Vec::new(),
            config_path: None,
            proxy: None,
        }
    }
}

fn default_binary() -> PathBuf {
    PathBuf::from("tls-client")
}

/// Outbound proxy settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "type", default)]
    pub kind: ProxyKind,
    pub url: String,
}

/// Proxy protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    #[default]
    Http,
    Socks5,
}
