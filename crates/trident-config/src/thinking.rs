use serde::Deserialize;

/// Reasoning defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThinkingConfig {
    /// Budget used when a thinking model is called without one
    #[serde(default = "default_budget")]
    pub default_budget: u32,
}

impl Default for ThinkingConfig {
    fn default() -> Self {
        Self {
            default_budget: default_budget(),
        }
    }
}

const fn default_budget() -> u32 {
    1024
}
