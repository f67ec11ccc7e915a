use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use vitalscope_core::{MetricSnapshot, OutboundMessage, Transport, VitalsError};

use crate::{Storage, keys};

/// Recommendations older than a day are discarded on read.
pub const RECOMMENDATIONS_TTL_MS: u64 = 24 * 60 * 60 * 1000;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Coordinator-side view of every instrumented tab.
pub struct CoordinatorStore<S: Storage> {
    storage: S,
}

impl<S: Storage> CoordinatorStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Applies one message from `tab_id` and returns the reply the page sees.
    pub async fn apply(&self, tab_id: u64, message: &OutboundMessage, now: u64) -> Result<Value> {
        debug!(tab_id, kind = message.kind(), "applying message");
        match message {
            OutboundMessage::MetricsLoading { .. } => {
                // A new epoch starts; epoch ids restart with every document,
                // so the previous snapshot must not shadow the next one.
                self.storage.remove(&keys::metrics(tab_id)).await?;
                self.storage.set(&keys::metrics_loading(tab_id), json!(true)).await?;
            }
            OutboundMessage::PerformanceMetrics { data } => {
                if self.is_superseded(tab_id, data).await? {
                    debug!(tab_id, sequence = data.update_sequence, "stale snapshot ignored");
                    return Ok(json!({ "success": true, "stale": true }));
                }
                self.storage
                    .set(&keys::metrics(tab_id), serde_json::to_value(data)?)
                    .await?;
                self.storage.set(&keys::metrics_loading(tab_id), json!(false)).await?;
            }
            OutboundMessage::MetricsError { .. } => {
                let mut error = serde_json::to_value(message)?;
                error["error"] = json!(true);
                self.storage.set(&keys::metrics(tab_id), error).await?;
                self.storage.set(&keys::metrics_loading(tab_id), json!(false)).await?;
            }
            OutboundMessage::RecommendationsLoading { .. } => {}
            OutboundMessage::RecommendationsGenerated { data } => {
                self.storage.set(&keys::recommendations(tab_id), data.clone()).await?;
                self.storage
                    .set(&keys::recommendations_timestamp(tab_id), json!(now))
                    .await?;
            }
            OutboundMessage::RecommendationsError { .. } => {
                self.storage.remove(&keys::recommendations(tab_id)).await?;
                self.storage.remove(&keys::recommendations_timestamp(tab_id)).await?;
            }
            OutboundMessage::GetCurrentTabId => return Ok(json!({ "tabId": tab_id })),
            OutboundMessage::ClsDebuggerState { enabled, .. } => {
                self.storage.set(&keys::cls_debugger(tab_id), json!(enabled)).await?;
            }
        }
        Ok(json!({ "success": true }))
    }

    /// A later snapshot of the same epoch is already stored.
    async fn is_superseded(&self, tab_id: u64, incoming: &MetricSnapshot) -> Result<bool> {
        let Some(stored) = self.metrics(tab_id).await? else {
            return Ok(false);
        };
        Ok(stored.epoch_id == incoming.epoch_id && stored.update_sequence >= incoming.update_sequence)
    }

    /// Latest snapshot for the tab; `None` if nothing or an error status is stored.
    pub async fn metrics(&self, tab_id: u64) -> Result<Option<MetricSnapshot>> {
        let Some(value) = self.storage.get(&keys::metrics(tab_id)).await? else {
            return Ok(None);
        };
        if value.get("error").is_some() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    pub async fn is_loading(&self, tab_id: u64) -> Result<bool> {
        let value = self.storage.get(&keys::metrics_loading(tab_id)).await?;
        Ok(value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    pub async fn cls_debugger_enabled(&self, tab_id: u64) -> Result<bool> {
        let value = self.storage.get(&keys::cls_debugger(tab_id)).await?;
        Ok(value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    /// Cached recommendations, dropping them once they are a day old.
    pub async fn recommendations(&self, tab_id: u64, now: u64) -> Result<Option<Value>> {
        let stamp = self
            .storage
            .get(&keys::recommendations_timestamp(tab_id))
            .await?
            .and_then(|v| v.as_u64());
        match stamp {
            Some(at) if now.saturating_sub(at) < RECOMMENDATIONS_TTL_MS => {
                self.storage.get(&keys::recommendations(tab_id)).await
            }
            Some(_) => {
                info!(tab_id, "recommendations expired");
                self.storage.remove(&keys::recommendations(tab_id)).await?;
                self.storage.remove(&keys::recommendations_timestamp(tab_id)).await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Forgets everything about a closed tab.
    pub async fn clear_tab(&self, tab_id: u64) -> Result<()> {
        for key in keys::all(tab_id) {
            self.storage.remove(&key).await?;
        }
        Ok(())
    }
}

/// Delivers a page's messages straight into the coordinator store.
pub struct StoreTransport<S: Storage> {
    store: Arc<CoordinatorStore<S>>,
    tab_id: u64,
}

impl<S: Storage> StoreTransport<S> {
    pub fn new(store: Arc<CoordinatorStore<S>>, tab_id: u64) -> Self {
        Self { store, tab_id }
    }
}

#[async_trait]
impl<S: Storage + 'static> Transport for StoreTransport<S> {
    async fn send(&self, message: &OutboundMessage) -> Result<Value, VitalsError> {
        self.store
            .apply(self.tab_id, message, now_ms())
            .await
            .map_err(|err| {
                VitalsError::transport_failure(format!("{:#}", err))
                    .with_context(json!({ "tabId": self.tab_id, "kind": message.kind() }))
            })
    }
}
