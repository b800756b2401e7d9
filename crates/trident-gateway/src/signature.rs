//! Thought-signature store
//!
//! The upstream issues an opaque signature with reasoning and tool-call
//! parts and rejects later turns of the same session that omit it. Clients
//! of the `OpenAI` and Anthropic protocols rarely echo it back, so the last
//! signature seen for each `(session, model)` pair is kept here and replayed
//! when the next request is encoded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use indexmap::IndexMap;
use trident_config::SignatureConfig;
use trident_core::{Clock, SystemClock};

/// Signature the upstream accepts in place of a real one
pub const DEFAULT_FALLBACK_SIGNATURE: &str = "skip_thought_signature_validator";

/// Read and write gates
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct SignaturePolicy {
    pub read_cache: bool,
    pub fallback: bool,
    pub tool_signatures_require_tools: bool,
    pub write_cache: bool,
    pub cache_image_models: bool,
    /// Fallback signatures keyed by model prefix; longest prefix wins
    pub fallback_overrides: IndexMap<String, String>,
}

impl Default for SignaturePolicy {
    fn default() -> Self {
        Self::from(&SignatureConfig::default())
    }
}

impl From<&SignatureConfig> for SignaturePolicy {
    fn from(config: &SignatureConfig) -> Self {
        Self {
            read_cache: config.read_cache,
            fallback: config.fallback,
            tool_signatures_require_tools: config.tool_signatures_require_tools,
            write_cache: config.write_cache,
            cache_image_models: config.cache_image_models,
            fallback_overrides: config.fallback_overrides.clone(),
        }
    }
}

impl SignaturePolicy {
    /// Static signature for `model`, if the fallback policy allows one
    pub fn fallback_for(&self, model: &str) -> Option<&str> {
        if !self.fallback {
            return None;
        }

        let signature = self
            .fallback_overrides
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map_or(DEFAULT_FALLBACK_SIGNATURE, |(_, signature)| signature.as_str());

        Some(signature)
    }
}

/// Last signatures recorded for one `(session, model)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureEntry {
    pub reasoning_signature: Option<String>,
    pub tool_signature: Option<String>,
    /// Reasoning text that accompanied the signature
    pub text: String,
    pub stored_at: Instant,
}

/// Signatures available to one exchange, resolved before encoding starts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSignatures {
    pub reasoning: Option<String>,
    pub reasoning_text: Option<String>,
    pub tool: Option<String>,
    pub fallback: Option<String>,
}

impl ResolvedSignatures {
    /// Cached reasoning signature, else the fallback
    pub fn reasoning_or_fallback(&self) -> Option<&str> {
        self.reasoning.as_deref().or(self.fallback.as_deref())
    }

    /// Cached tool signature, else the fallback
    pub fn tool_or_fallback(&self) -> Option<&str> {
        self.tool.as_deref().or(self.fallback.as_deref())
    }
}

/// Facts about the finished exchange that gate a cache write
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteContext {
    /// The signature came from a tool-call turn
    pub has_tools: bool,
    pub is_image_model: bool,
}

/// Volatile `(session, model)` keyed signature store
pub struct SignatureCache {
    entries: DashMap<(String, String), SignatureEntry>,
    policy: SignaturePolicy,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SignatureCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureCache")
            .field("entries", &self.entries.len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl SignatureCache {
    pub fn new(policy: SignaturePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            policy,
            clock,
        }
    }

    /// Cache driven by the wall clock
    pub fn with_policy(policy: SignaturePolicy) -> Self {
        Self::new(policy, Arc::new(SystemClock))
    }

    pub const fn policy(&self) -> &SignaturePolicy {
        &self.policy
    }

    /// Raw entry, ignoring read policy
    pub fn get(&self, session_id: &str, model: &str) -> Option<SignatureEntry> {
        self.entries
            .get(&(session_id.to_owned(), model.to_owned()))
            .map(|entry| entry.value().clone())
    }

    /// Everything an encoder may use for this exchange
    ///
    /// Performs the single cache read of the exchange. Tool signatures are
    /// withheld from tool-less requests unless the policy says otherwise.
    pub fn resolve(&self, session_id: &str, model: &str, tools_present: bool) -> ResolvedSignatures {
        let fallback = self.policy.fallback_for(model).map(str::to_owned);

        if !self.policy.read_cache {
            return ResolvedSignatures {
                fallback,
                ..ResolvedSignatures::default()
            };
        }

        let Some(entry) = self.get(session_id, model) else {
            return ResolvedSignatures {
                fallback,
                ..ResolvedSignatures::default()
            };
        };

        let tool_allowed = tools_present || !self.policy.tool_signatures_require_tools;

        ResolvedSignatures {
            reasoning_text: entry.reasoning_signature.as_ref().map(|_| entry.text.clone()),
            reasoning: entry.reasoning_signature,
            tool: entry.tool_signature.filter(|_| tool_allowed),
            fallback,
        }
    }

    /// Record the signature of a finished exchange, replacing any prior entry
    ///
    /// A tool-turn signature fills both slots, since the upstream accepts it
    /// on the thought part of the same turn. Returns whether a write happened.
    pub fn set(&self, session_id: &str, model: &str, signature: &str, text: &str, context: WriteContext) -> bool {
        if !self.policy.write_cache || signature.is_empty() {
            return false;
        }

        if context.is_image_model && !self.policy.cache_image_models {
            return false;
        }

        let entry = SignatureEntry {
            reasoning_signature: Some(signature.to_owned()),
            tool_signature: context.has_tools.then(|| signature.to_owned()),
            text: if text.is_empty() { " ".to_owned() } else { text.to_owned() },
            stored_at: self.clock.now(),
        };

        self.entries.insert((session_id.to_owned(), model.to_owned()), entry);

        tracing::debug!(
            session_id,
            model,
            has_tools = context.has_tools,
            "stored thought signature"
        );

        true
    }

    /// Drop entries last written more than `age` ago
    pub fn prune_older_than(&self, age: Duration) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.stored_at) <= age);
        before - self.entries.len()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use trident_core::ManualClock;

    use super::*;

    fn cache(policy: SignaturePolicy) -> (SignatureCache, ManualClock) {
        let clock = ManualClock::new();
        (SignatureCache::new(policy, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn set_overwrites_previous_entry() {
        let (cache, _) = cache(SignaturePolicy::default());
        let tools = WriteContext {
            has_tools: true,
            is_image_model: false,
        };

        assert!(cache.set("s", "m", "first", "thinking", tools));
        assert!(cache.set("s", "m", "second", "", WriteContext::default()));

        let entry = cache.get("s", "m").unwrap();
        assert_eq!(entry.reasoning_signature.as_deref(), Some("second"));
        assert_eq!(entry.tool_signature, None);
        assert_eq!(entry.text, " ");
    }

    #[test]
    fn entries_are_scoped_by_session_and_model() {
        let (cache, _) = cache(SignaturePolicy::default());
        cache.set("s1", "m", "sig", "t", WriteContext::default());

        assert!(cache.get("s2", "m").is_none());
        assert!(cache.get("s1", "other").is_none());
        assert!(cache.get("s1", "m").is_some());
    }

    #[test]
    fn write_toggle_and_image_models_gate_writes() {
        let (disabled, _) = cache(SignaturePolicy {
            write_cache: false,
            ..SignaturePolicy::default()
        });
        assert!(!disabled.set("s", "m", "sig", "t", WriteContext::default()));
        assert!(disabled.is_empty());

        let (cache, _) = cache(SignaturePolicy::default());
        let image = WriteContext {
            has_tools: false,
            is_image_model: true,
        };
        assert!(!cache.set("s", "gemini-3-pro-image", "sig", "t", image));
        assert!(cache.is_empty());
    }

    #[test]
    fn resolve_respects_read_policy() {
        let (cache, _) = cache(SignaturePolicy {
            read_cache: false,
            ..SignaturePolicy::default()
        });
        cache.set("s", "m", "sig", "t", WriteContext::default());

        assert_eq!(cache.resolve("s", "m", false), ResolvedSignatures::default());
    }

    #[test]
    fn tool_signature_withheld_without_tools() {
        let (cache, _) = cache(SignaturePolicy::default());
        let tools = WriteContext {
            has_tools: true,
            is_image_model: false,
        };
        cache.set("s", "m", "tool-sig", "t", tools);

        assert_eq!(cache.resolve("s", "m", false).tool, None);
        assert_eq!(cache.resolve("s", "m", true).tool.as_deref(), Some("tool-sig"));
        assert_eq!(cache.resolve("s", "m", false).reasoning.as_deref(), Some("tool-sig"));
    }

    #[test]
    fn tool_signature_released_when_policy_relaxed() {
        let (cache, _) = cache(SignaturePolicy {
            tool_signatures_require_tools: false,
            ..SignaturePolicy::default()
        });
        let tools = WriteContext {
            has_tools: true,
            is_image_model: false,
        };
        cache.set("s", "m", "tool-sig", "t", tools);

        assert_eq!(cache.resolve("s", "m", false).tool.as_deref(), Some("tool-sig"));
    }

    #[test]
    fn fallback_prefers_longest_override() {
        let mut overrides = IndexMap::new();
        overrides.insert("claude-".to_owned(), "claude".to_owned());
        overrides.insert("claude-opus-".to_owned(), "opus".to_owned());
        let policy = SignaturePolicy {
            fallback: true,
            fallback_overrides: overrides,
            ..SignaturePolicy::default()
        };

        assert_eq!(policy.fallback_for("claude-opus-4-thinking"), Some("opus"));
        assert_eq!(policy.fallback_for("claude-sonnet-4-5"), Some("claude"));
        assert_eq!(policy.fallback_for("gemini-3-pro"), Some(DEFAULT_FALLBACK_SIGNATURE));
        assert_eq!(SignaturePolicy::default().fallback_for("gemini-3-pro"), None);
    }

    #[test]
    fn prune_uses_injected_clock() {
        let (cache, clock) = cache(SignaturePolicy::default());
        cache.set("old", "m", "sig", "t", WriteContext::default());
        clock.advance(Duration::from_secs(600));
        cache.set("new", "m", "sig", "t", WriteContext::default());

        assert_eq!(cache.prune_older_than(Duration::from_secs(300)), 1);
        assert!(cache.get("old", "m").is_none());
        assert!(cache.get("new", "m").is_some());

        cache.clear();
        assert!(cache.is_empty());
    }
}
