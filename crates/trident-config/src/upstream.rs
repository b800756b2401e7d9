use serde::Deserialize;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://daily-cloudcode-pa.sandbox.googleapis.com";
const DEFAULT_HOST: &str = "daily-cloudcode-pa.sandbox.googleapis.com";
const DEFAULT_USER_AGENT: &str = "antigravity/1.11.3 windows/amd64";

/// Upstream endpoint configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Base URL the `v1internal` endpoints hang off
    #[serde(default = "default_base_url")]
    pub base_url: Url,
    /// Value of the fixed `Host` header
    #[serde(default = "default_host")]
    pub host: String,
    /// Value of the fixed `User-Agent` header
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Connect/read timeout handed to the transport process
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// How long a fetched model list stays fresh
    #[serde(default = "default_model_list_ttl_seconds")]
    pub model_list_ttl_seconds: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            host: default_host(),
            user_agent: default_user_agent(),
            timeout_seconds: default_timeout_seconds(),
            model_list_ttl_seconds: default_model_list_ttl_seconds(),
        }
    }
}

#[allow(clippy::expect_used)]
fn default_base_url() -> Url {
    Url::parse(DEFAULT_BASE_URL).expect("valid default URL")
}

fn default_host() -> String {
    DEFAULT_HOST.to_owned()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_owned()
}

const fn default_timeout_seconds() -> u64 {
    180
}

const fn default_model_list_ttl_seconds() -> u64 {
    3600
}
