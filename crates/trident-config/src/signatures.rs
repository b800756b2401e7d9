use indexmap::IndexMap;
use serde::Deserialize;

/// Trust policies for upstream thought signatures
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(clippy::struct_excessive_bools)]
pub struct SignatureConfig {
    /// Reuse signatures cached from earlier turns of the same session
    #[serde(default = "enabled")]
    pub read_cache: bool,
    /// Fall back to a static per-model signature when nothing else resolves
    #[serde(default)]
    pub fallback: bool,
    /// Only hand out cached tool signatures when the request declares tools
    #[serde(default = "enabled")]
    pub tool_signatures_require_tools: bool,
    /// Record signatures after each completed exchange
    #[serde(default = "enabled")]
    pub write_cache: bool,
    /// Allow image-generating models to write the cache
    #[serde(default)]
    pub cache_image_models: bool,
    /// Return signatures to clients so they can echo them back
    #[serde(default)]
    pub expose_to_clients: bool,
    /// Fallback signatures keyed by model name prefix
    #[serde(default)]
    pub fallback_overrides: IndexMap<String, String>,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            read_cache: true,
            fallback: false,
            tool_signatures_require_tools: true,
            write_cache: true,
            cache_image_models: false,
            expose_to_clients: false,
            fallback_overrides: IndexMap::new(),
        }
    }
}

#[allow(clippy::missing_const_for_fn)]
fn enabled() -> bool {
    true
}
