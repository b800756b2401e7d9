use secrecy::SecretString;
use serde::Deserialize;

/// One upstream account
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountConfig {
    /// Bearer token sent to the upstream
    pub access_token: SecretString,
    /// Project the upstream bills the request to
    pub project_id: String,
    /// Fixed session id; generated at startup when absent
    #[serde(default)]
    pub session_id: Option<String>,
}
