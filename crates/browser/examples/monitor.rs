use std::sync::Arc;

use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use vitalscope_browser::{ChromiumMonitor, MonitorConfig};
use vitalscope_core::{EngineConfig, InboundCommand, MessagingClient, RetryPolicy};
use vitalscope_storage::{CoordinatorStore, JsonFileStorage, StoreTransport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,vitalscope_engine=debug")),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://example.com".to_string());
    let engine = match std::env::var("VITALSCOPE_CONFIG") {
        Ok(path) => EngineConfig::from_json_file(path)?,
        Err(_) => EngineConfig::default(),
    };

    let store = Arc::new(CoordinatorStore::new(JsonFileStorage::new("results")?));
    let client = MessagingClient::new(
        StoreTransport::new(store.clone(), 1),
        RetryPolicy::from_config(&engine.retry),
    );

    // Ask for a fresh snapshot halfway through, like a popup opening.
    let (commands, receiver) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        let _ = commands.send(InboundCommand::ForceRefresh);
    });

    let monitor = ChromiumMonitor::new(MonitorConfig::default().with_run_duration(20_000), engine);
    let summary = monitor.run(&url, &client, receiver).await?;

    for snapshot in summary.latest_per_epoch() {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
    }
    for error in &summary.errors {
        println!("error: {}", error);
    }
    if let Some(stored) = store.metrics(1).await? {
        println!("stored epoch {} seq {}", stored.epoch_id, stored.update_sequence);
    }
    Ok(())
}
