use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig, HeadlessMode};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval, sleep_until, timeout};
use tracing::{debug, info, warn};
use vitalscope_core::{
    EngineConfig, InboundCommand, MessagingClient, MetricSnapshot, OutboundMessage, Transport,
    VitalsError,
};
use vitalscope_engine::{NavigationEpochController, PageHost};

use crate::host::{ChromiumHost, ObserverCommand};
use crate::page::{PageBatch, PageProbe, dispatch};
use crate::shared::{MonitorConfig, is_context_lost, js, to_vitals_error};

/// What a monitoring run delivered.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Epochs that started loading, full loads and transitions alike.
    pub epochs: usize,
    pub snapshots: Vec<MetricSnapshot>,
    pub errors: Vec<String>,
}

impl RunSummary {
    pub fn record(&mut self, message: &OutboundMessage) {
        match message {
            OutboundMessage::MetricsLoading { .. } => self.epochs += 1,
            OutboundMessage::PerformanceMetrics { data } => self.snapshots.push(data.clone()),
            OutboundMessage::MetricsError { error_type, error_message, .. } => {
                self.errors.push(format!("{}: {}", error_type, error_message))
            }
            _ => {}
        }
    }

    /// The most recent snapshot per epoch, in epoch order.
    pub fn latest_per_epoch(&self) -> Vec<&MetricSnapshot> {
        let mut latest: Vec<&MetricSnapshot> = Vec::new();
        for snapshot in &self.snapshots {
            match latest.iter_mut().find(|s| s.epoch_id == snapshot.epoch_id) {
                Some(slot) if slot.update_sequence < snapshot.update_sequence => *slot = snapshot,
                Some(_) => {}
                None => latest.push(snapshot),
            }
        }
        latest.sort_by_key(|s| s.epoch_id);
        latest
    }
}

enum Tick {
    Continue,
    /// Malformed page events were skipped.
    Dropped(usize),
    /// The tick could not read the page; the next one tries again.
    Failed(VitalsError),
    NewDocument(PageProbe),
}

/// Drives one engine against a live Chromium tab.
pub struct ChromiumMonitor {
    config: MonitorConfig,
    engine: EngineConfig,
}

impl ChromiumMonitor {
    pub fn new(config: MonitorConfig, engine: EngineConfig) -> Self {
        Self { config, engine }
    }

    async fn launch(&self) -> Result<Browser, VitalsError> {
        let temp_dir = std::env::temp_dir().join(format!("chromium-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&temp_dir)
            .map_err(|e| to_vitals_error(format!("creating {}: {}", temp_dir.display(), e), "Launch"))?;

        let mut builder = ChromeConfig::builder()
            .headless_mode(if self.config.headless { HeadlessMode::True } else { HeadlessMode::False })
            .user_data_dir(temp_dir);
        if let Some((w, h)) = self.config.viewport {
            builder = builder.window_size(w, h);
        }

        let chrome_cfg = builder.build().map_err(|e| to_vitals_error(e, "Config"))?;
        let (browser, mut handler) = Browser::launch(chrome_cfg)
            .await
            .map_err(|e| to_vitals_error(e, "Launch"))?;

        tokio::spawn(async move { while handler.next().await.is_some() {} });
        Ok(browser)
    }

    /// Opens `url` and reports its vitals through `client` until the run
    /// duration elapses. Commands arriving on `commands` reach the engine
    /// between ticks.
    pub async fn run<T: Transport>(
        &self,
        url: &str,
        client: &MessagingClient<T>,
        commands: mpsc::UnboundedReceiver<InboundCommand>,
    ) -> Result<RunSummary, VitalsError> {
        let mut browser = self.launch().await?;
        let result = self.watch(&browser, url, client, commands).await;
        if let Err(err) = browser.close().await {
            warn!(error = %err, "browser did not close cleanly");
        }
        result
    }

    async fn watch<T: Transport>(
        &self,
        browser: &Browser,
        url: &str,
        client: &MessagingClient<T>,
        mut commands: mpsc::UnboundedReceiver<InboundCommand>,
    ) -> Result<RunSummary, VitalsError> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| to_vitals_error(e, "NewPage"))?;
        page.evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(
            js::instrument::INSTALL,
        ))
        .await
        .map_err(|e| to_vitals_error(e, "Install"))?;

        info!(url, "navigating");
        timeout(self.config.navigation_timeout, page.goto(url.to_string()))
            .await
            .map_err(|_| {
                VitalsError::transport_failure(format!(
                    "Goto timed out after {}ms",
                    self.config.navigation_timeout.as_millis()
                ))
            })?
            .map_err(|e| to_vitals_error(e, "Goto"))?;

        let mut summary = RunSummary::default();
        let probe = evaluate::<PageProbe>(&page, js::build_js_call(js::probe::PROBE, &[]), "Probe").await?;
        let mut controller = NavigationEpochController::new(ChromiumHost::new(probe), self.engine.clone());
        let attached = controller.attach();
        flush_observers(&page, &mut controller).await;
        deliver(&mut controller, client, &mut summary).await;
        attached?;

        let deadline = Instant::now() + self.config.run_duration;
        let mut ticker = interval(self.config.probe_interval);
        // Page-side failures are reported once per document, then only logged.
        let mut failure_reported = false;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                Some(command) = commands.recv() => controller.on_command(command),
                _ = ticker.tick() => match tick(&page, &mut controller).await {
                    Tick::Continue => {}
                    Tick::Dropped(count) => {
                        let err = VitalsError::observation_failure(format!(
                            "{} malformed page events skipped",
                            count
                        ));
                        if !failure_reported {
                            failure_reported = true;
                            surface(&controller, client, &mut summary, &err).await;
                        }
                    }
                    Tick::Failed(err) => {
                        warn!(error = %err, "tick failed");
                        if !failure_reported {
                            failure_reported = true;
                            surface(&controller, client, &mut summary, &err).await;
                        }
                    }
                    Tick::NewDocument(probe) => {
                        failure_reported = false;
                        info!(url = %probe.url, "new document, re-attaching");
                        controller.detach();
                        deliver(&mut controller, client, &mut summary).await;
                        controller = NavigationEpochController::new(ChromiumHost::new(probe), self.engine.clone());
                        if let Err(err) = controller.attach() {
                            warn!(error = %err, "document cannot be instrumented");
                        }
                        flush_observers(&page, &mut controller).await;
                    }
                },
            }
            deliver(&mut controller, client, &mut summary).await;
        }

        controller.detach();
        flush_observers(&page, &mut controller).await;
        deliver(&mut controller, client, &mut summary).await;
        info!(
            epochs = summary.epochs,
            snapshots = summary.snapshots.len(),
            errors = summary.errors.len(),
            "run finished"
        );
        Ok(summary)
    }
}

async fn evaluate<T: DeserializeOwned>(page: &Page, script: String, action: &str) -> Result<T, VitalsError> {
    let result = page.evaluate(script).await.map_err(|e| to_vitals_error(e, action))?;
    let value = result.value().cloned().unwrap_or(serde_json::Value::Null);
    serde_json::from_value(value).map_err(|e| to_vitals_error(e, action))
}

/// Refreshes the probe, feeds queued page events and fires due timers.
async fn tick(page: &Page, controller: &mut NavigationEpochController<ChromiumHost>) -> Tick {
    let probe = match evaluate::<PageProbe>(page, js::build_js_call(js::probe::PROBE, &[]), "Probe").await {
        Ok(probe) => probe,
        Err(err) if is_context_lost(&err.message) => {
            debug!("page context lost, skipping tick");
            return Tick::Continue;
        }
        Err(err) => return Tick::Failed(err),
    };
    if !controller.host().probe().same_document(&probe) {
        return Tick::NewDocument(probe);
    }
    controller.host_mut().update(probe);

    let batch = match evaluate::<PageBatch>(page, js::build_js_call(js::instrument::DRAIN, &[]), "Drain").await {
        Ok(batch) => batch,
        Err(err) if is_context_lost(&err.message) => PageBatch::default(),
        Err(err) => {
            // Timers still run on the fresh probe.
            controller.advance();
            return Tick::Failed(err);
        }
    };
    if !batch.installed {
        debug!("instrumentation not installed yet");
    }
    let (events, dropped) = batch.decode();
    for event in events {
        dispatch(controller, event);
    }
    controller.advance();
    flush_observers(page, controller).await;
    if dropped > 0 { Tick::Dropped(dropped) } else { Tick::Continue }
}

/// Applies queued observer changes; a failed subscribe goes back to the engine.
async fn flush_observers(page: &Page, controller: &mut NavigationEpochController<ChromiumHost>) {
    for command in controller.host_mut().take_commands() {
        let Err(err) = page.evaluate(command.script()).await else {
            continue;
        };
        let message = err.to_string();
        match command {
            ObserverCommand::Observe(kind, epoch) if !is_context_lost(&message) => {
                controller.on_observer_error(kind, epoch, message);
            }
            _ => debug!(observer = command.kind().as_str(), error = %message, "observer command dropped"),
        }
    }
}

/// Sends a runtime failure to the coordinator as an error status.
async fn surface<H: PageHost, T: Transport>(
    controller: &NavigationEpochController<H>,
    client: &MessagingClient<T>,
    summary: &mut RunSummary,
    err: &VitalsError,
) {
    let url = controller.host().current_url();
    let message = OutboundMessage::metrics_error(err, url.clone(), controller.host().wall_clock_ms());
    summary.record(&message);
    client.send_or_report(&message, &url, controller.host().wall_clock_ms()).await;
}

async fn deliver<H: PageHost, T: Transport>(
    controller: &mut NavigationEpochController<H>,
    client: &MessagingClient<T>,
    summary: &mut RunSummary,
) {
    let url = controller.host().current_url();
    let now = controller.host().wall_clock_ms();
    for message in controller.drain_outbox() {
        summary.record(&message);
        client.send_or_report(&message, &url, now).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use vitalscope_core::{Epoch, EpochId, EpochKind, RetryPolicy};
    use vitalscope_storage::{CoordinatorStore, MemoryStorage, Storage, StoreTransport};

    fn snapshot(epoch: u64, sequence: u64) -> MetricSnapshot {
        let epoch = Epoch::new(EpochId::new(epoch), EpochKind::ClientTransition, Duration::ZERO, "https://a.test/");
        MetricSnapshot {
            update_sequence: sequence,
            ..MetricSnapshot::empty(&epoch, 0)
        }
    }

    #[test]
    fn summary_keeps_latest_snapshot_per_epoch() {
        let mut summary = RunSummary::default();
        summary.record(&OutboundMessage::MetricsLoading { url: "https://a.test/".into(), timestamp: 0 });
        for (epoch, sequence) in [(1, 1), (2, 1), (1, 2), (2, 3), (2, 2)] {
            summary.record(&OutboundMessage::PerformanceMetrics { data: snapshot(epoch, sequence) });
        }
        summary.record(&OutboundMessage::metrics_error(
            &VitalsError::capability_unsupported("paint"),
            "https://a.test/",
            0,
        ));

        assert_eq!(summary.epochs, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].starts_with("CapabilityUnsupported"));
        let latest: Vec<_> = summary
            .latest_per_epoch()
            .iter()
            .map(|s| (s.epoch_id.get(), s.update_sequence))
            .collect();
        assert_eq!(latest, vec![(1, 2), (2, 3)]);
    }

    #[tokio::test]
    async fn runtime_failure_reaches_the_coordinator_as_an_error_status() {
        let store = Arc::new(CoordinatorStore::new(MemoryStorage::new()));
        let client = MessagingClient::new(StoreTransport::new(store.clone(), 7), RetryPolicy::default());
        let probe: PageProbe = serde_json::from_value(serde_json::json!({
            "now": 40.0, "timeOrigin": 1.0, "wallClock": 1700000000040u64,
            "url": "https://a.test/", "readyState": "interactive"
        }))
        .unwrap();
        let controller = NavigationEpochController::new(ChromiumHost::new(probe), EngineConfig::default());

        let mut summary = RunSummary::default();
        let err = VitalsError::observation_failure("2 malformed page events skipped");
        surface(&controller, &client, &mut summary, &err).await;

        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains("malformed page events"));
        let raw = store.storage().get("metrics_7").await.unwrap().unwrap();
        assert_eq!(raw["errorType"], "ObservationTransientFailure");
        assert_eq!(raw["url"], "https://a.test/");
    }
}
