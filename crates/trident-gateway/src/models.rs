//! Cached upstream model list

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use trident_core::Clock;

use crate::error::GatewayError;

/// A model the upstream offers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEntry {
    pub id: String,
    pub display_name: Option<String>,
}

/// Parse a `fetchAvailableModels` body
///
/// `models` is either an object keyed by model id or an array of ids or
/// objects with a `name`/`id` field.
pub fn parse_model_list(body: &str) -> Result<Vec<ModelEntry>, GatewayError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| GatewayError::ResponseProcessing(format!("invalid model list: {e}")))?;

    let display_name = |info: &Value| {
        info.get("displayName")
            .and_then(Value::as_str)
            .map(str::to_owned)
    };

    let entries = match value.get("models") {
        Some(Value::Object(models)) => models
            .iter()
            .map(|(id, info)| ModelEntry {
                id: id.clone(),
                display_name: display_name(info),
            })
            .collect(),
        Some(Value::Array(models)) => models
            .iter()
            .filter_map(|info| {
                let id = info
                    .as_str()
                    .or_else(|| info.get("name").and_then(Value::as_str))
                    .or_else(|| info.get("id").and_then(Value::as_str))?;
                Some(ModelEntry {
                    id: id.trim_start_matches("models/").to_owned(),
                    display_name: display_name(info),
                })
            })
            .collect(),
        _ => Vec::new(),
    };

    Ok(entries)
}

/// Model list with a time-to-live
pub struct ModelListCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entry: Mutex<Option<(Instant, Arc<Vec<ModelEntry>>)>>,
}

impl ModelListCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entry: Mutex::new(None),
        }
    }

    /// Cached list while fresh
    pub fn get(&self) -> Option<Arc<Vec<ModelEntry>>> {
        let entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        entry
            .as_ref()
            .filter(|(fetched_at, _)| self.clock.now().duration_since(*fetched_at) < self.ttl)
            .map(|(_, models)| Arc::clone(models))
    }

    pub fn insert(&self, models: Vec<ModelEntry>) -> Arc<Vec<ModelEntry>> {
        let models = Arc::new(models);
        *self.entry.lock().unwrap_or_else(PoisonError::into_inner) = Some((self.clock.now(), Arc::clone(&models)));
        models
    }

    pub fn invalidate(&self) {
        *self.entry.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Cached list, or the result of `fetch` stored for the next caller
    ///
    /// A failed fetch leaves the cache untouched.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<Arc<Vec<ModelEntry>>, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<ModelEntry>, GatewayError>>,
    {
        if let Some(models) = self.get() {
            return Ok(models);
        }

        let models = fetch().await?;
        tracing::debug!(count = models.len(), "refreshed upstream model list");
        Ok(self.insert(models))
    }
}
