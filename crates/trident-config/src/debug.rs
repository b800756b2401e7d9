use serde::Deserialize;

/// Raw exchange dumps
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DebugConfig {
    /// Emit outgoing bodies and raw upstream bytes as trace events
    #[serde(default)]
    pub dump: bool,
}
