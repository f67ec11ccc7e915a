use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

mod coordinator;

pub use coordinator::{CoordinatorStore, RECOMMENDATIONS_TTL_MS, StoreTransport, now_ms};

/// Per-tab key names shared with the popup.
pub mod keys {
    pub fn metrics(tab_id: u64) -> String {
        format!("metrics_{}", tab_id)
    }

    pub fn metrics_loading(tab_id: u64) -> String {
        format!("metricsLoading_{}", tab_id)
    }

    pub fn cls_debugger(tab_id: u64) -> String {
        format!("clsDebugger_{}", tab_id)
    }

    pub fn recommendations(tab_id: u64) -> String {
        format!("recommendations_{}", tab_id)
    }

    pub fn recommendations_timestamp(tab_id: u64) -> String {
        format!("recommendationsTimestamp_{}", tab_id)
    }

    pub fn all(tab_id: u64) -> [String; 5] {
        [
            metrics(tab_id),
            metrics_loading(tab_id),
            cls_debugger(tab_id),
            recommendations(tab_id),
            recommendations_timestamp(tab_id),
        ]
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// One pretty-printed JSON file per key.
pub struct JsonFileStorage {
    pub folder: PathBuf,
}

impl JsonFileStorage {
    pub fn new(folder: impl AsRef<Path>) -> Result<Self> {
        let folder = folder.as_ref().to_path_buf();
        std::fs::create_dir_all(&folder)
            .with_context(|| format!("creating store folder {}", folder.display()))?;
        Ok(Self { folder })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.folder.join(format!("{}.json", key))
    }
}

#[async_trait]
impl Storage for JsonFileStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => Ok(Some(
                serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?,
            )),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let data = serde_json::to_string_pretty(&value)?;
        tokio::fs::write(self.path(key), data).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path(key)).await {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_names_follow_the_popup_schema() {
        assert_eq!(keys::metrics(7), "metrics_7");
        assert_eq!(keys::recommendations_timestamp(7), "recommendationsTimestamp_7");
        assert_eq!(keys::all(3)[2], "clsDebugger_3");
    }

    #[tokio::test]
    async fn json_files_round_trip_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStorage::new(dir.path().join("tabs")).unwrap();
        assert_eq!(store.get("metrics_1").await.unwrap(), None);

        store.set("metrics_1", json!({ "ttfb": 120.0 })).await.unwrap();
        assert!(dir.path().join("tabs/metrics_1.json").exists());
        assert_eq!(store.get("metrics_1").await.unwrap(), Some(json!({ "ttfb": 120.0 })));

        store.remove("metrics_1").await.unwrap();
        store.remove("metrics_1").await.unwrap();
        assert_eq!(store.get("metrics_1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStorage::new(dir.path()).unwrap();
        std::fs::write(dir.path().join("metrics_2.json"), "{not json").unwrap();
        let err = store.get("metrics_2").await.unwrap_err();
        assert!(err.to_string().contains("metrics_2.json"));
    }

    #[tokio::test]
    async fn memory_store_overwrites() {
        let store = MemoryStorage::new();
        store.set("k", json!(1)).await.unwrap();
        store.set("k", json!(2)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!(2)));
        assert_eq!(store.len().await, 1);
    }
}
