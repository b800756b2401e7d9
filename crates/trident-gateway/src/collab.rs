//! Collaborators the gateway depends on only through traits

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use secrecy::SecretString;
use trident_config::AccountConfig;

// -- Tokens --

/// Credentials for one upstream exchange
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// Opaque handle the source uses to find the account again
    pub account: usize,
    pub access_token: SecretString,
    pub session_id: String,
    pub project_id: String,
}

/// Supplies upstream credentials
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Next usable token, or `None` when every account is unavailable
    async fn acquire(&self) -> Option<AccessToken>;

    /// Stop handing out the token's account after the upstream revoked access
    fn disable(&self, token: &AccessToken);
}

struct Account {
    access_token: SecretString,
    project_id: String,
    session_id: String,
    disabled: AtomicBool,
}

/// Round-robin over the configured accounts
pub struct StaticTokenSource {
    accounts: Vec<Account>,
    next: AtomicUsize,
}

impl StaticTokenSource {
    pub fn new(accounts: &[AccountConfig]) -> Self {
        let accounts = accounts
            .iter()
            .map(|account| Account {
                access_token: account.access_token.clone(),
                project_id: account.project_id.clone(),
                session_id: account.session_id.clone().unwrap_or_else(random_session_id),
                disabled: AtomicBool::new(false),
            })
            .collect();

        Self {
            accounts,
            next: AtomicUsize::new(0),
        }
    }

    /// Number of accounts still in rotation
    pub fn available(&self) -> usize {
        self.accounts
            .iter()
            .filter(|account| !account.disabled.load(Ordering::Relaxed))
            .count()
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn acquire(&self) -> Option<AccessToken> {
        let count = self.accounts.len();
        if count == 0 {
            return None;
        }

        let start = self.next.fetch_add(1, Ordering::Relaxed);
        (0..count).map(|offset| (start + offset) % count).find_map(|index| {
            let account = &self.accounts[index];
            (!account.disabled.load(Ordering::Relaxed)).then(|| AccessToken {
                account: index,
                access_token: account.access_token.clone(),
                session_id: account.session_id.clone(),
                project_id: account.project_id.clone(),
            })
        })
    }

    fn disable(&self, token: &AccessToken) {
        if let Some(account) = self.accounts.get(token.account)
            && !account.disabled.swap(true, Ordering::Relaxed)
        {
            tracing::warn!(
                account = token.account,
                project_id = %account.project_id,
                "upstream revoked access, account disabled"
            );
        }
    }
}

/// Session ids the upstream accepts are negative decimal integers
fn random_session_id() -> String {
    let value: u64 = rand::rng().random_range(1_000_000_000_000_000_000..9_000_000_000_000_000_000);
    format!("-{value}")
}

// -- Tool names --

/// Remembers the client's name for every sanitized tool name
pub trait ToolNameRegistry: Send + Sync {
    fn register(&self, model: &str, sanitized: &str, original: &str);

    fn original(&self, model: &str, sanitized: &str) -> Option<String>;
}

#[derive(Debug, Default)]
pub struct MemoryToolNameRegistry {
    names: DashMap<(String, String), String>,
}

impl MemoryToolNameRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ToolNameRegistry for MemoryToolNameRegistry {
    fn register(&self, model: &str, sanitized: &str, original: &str) {
        self.names
            .insert((model.to_owned(), sanitized.to_owned()), original.to_owned());
    }

    fn original(&self, model: &str, sanitized: &str) -> Option<String> {
        self.names
            .get(&(model.to_owned(), sanitized.to_owned()))
            .map(|name| name.value().clone())
    }
}

// -- Images --

/// Persists inline images and returns a URL clients can render
pub trait ImageStore: Send + Sync {
    fn save(&self, base64_data: &str, mime_type: &str) -> String;
}

/// Embeds the image as a `data:` URI
#[derive(Debug, Default, Clone, Copy)]
pub struct DataUriImageStore;

impl ImageStore for DataUriImageStore {
    fn save(&self, base64_data: &str, mime_type: &str) -> String {
        format!("data:{mime_type};base64,{base64_data}")
    }
}

// -- Debug dumps --

/// Receives raw exchange payloads for offline inspection
pub trait DebugSink: Send + Sync {
    fn request(&self, _correlation_id: &str, _body: &str) {}

    fn stream_chunk(&self, _correlation_id: &str, _chunk: &[u8]) {}

    fn response(&self, _correlation_id: &str, _body: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDebugSink;

impl DebugSink for NoopDebugSink {}

/// Emits payloads as `trace` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDebugSink;

impl DebugSink for TracingDebugSink {
    fn request(&self, correlation_id: &str, body: &str) {
        tracing::trace!(target: "trident::dump", correlation_id, body, "upstream request");
    }

    fn stream_chunk(&self, correlation_id: &str, chunk: &[u8]) {
        tracing::trace!(
            target: "trident::dump",
            correlation_id,
            chunk = %String::from_utf8_lossy(chunk),
            "upstream stream chunk"
        );
    }

    fn response(&self, correlation_id: &str, body: &str) {
        tracing::trace!(target: "trident::dump", correlation_id, body, "upstream response");
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    fn account(token: &str, session: Option<&str>) -> AccountConfig {
        AccountConfig {
            access_token: SecretString::from(token.to_owned()),
            project_id: format!("project-{token}"),
            session_id: session.map(str::to_owned),
        }
    }

    #[tokio::test]
    async fn rotates_over_accounts() {
        let source = StaticTokenSource::new(&[account("a", Some("-1")), account("b", None)]);

        let first = source.acquire().await.unwrap();
        let second = source.acquire().await.unwrap();
        let third = source.acquire().await.unwrap();

        assert_eq!(first.access_token.expose_secret(), "a");
        assert_eq!(first.session_id, "-1");
        assert_eq!(second.access_token.expose_secret(), "b");
        assert!(second.session_id.starts_with('-'));
        assert!(second.session_id[1..].parse::<u64>().is_ok());
        assert_eq!(third.access_token.expose_secret(), "a");
    }

    #[tokio::test]
    async fn disabled_accounts_are_skipped() {
        let source = StaticTokenSource::new(&[account("a", None), account("b", None)]);

        let first = source.acquire().await.unwrap();
        source.disable(&first);
        source.disable(&first);

        assert_eq!(source.available(), 1);
        for _ in 0..3 {
            assert_eq!(source.acquire().await.unwrap().access_token.expose_secret(), "b");
        }

        let last = source.acquire().await.unwrap();
        source.disable(&last);
        assert!(source.acquire().await.is_none());
    }

    #[test]
    fn registry_is_scoped_by_model() {
        let registry = MemoryToolNameRegistry::new();
        registry.register("m1", "get_weather_", "get weather!");

        assert_eq!(registry.original("m1", "get_weather_").as_deref(), Some("get weather!"));
        assert_eq!(registry.original("m2", "get_weather_"), None);
    }

    #[test]
    fn data_uri_store() {
        assert_eq!(DataUriImageStore.save("AAAA", "image/png"), "data:image/png;base64,AAAA");
    }
}
