use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use tracing::debug;
use vitalscope_core::{
    CapabilityMatrix, EpochId, LcpCandidate, NavigationTiming, ObservationError,
    model::from_millis_f64,
};
use vitalscope_engine::{ObserverKind, PageHost};

use crate::page::{PageProbe, page_name};
use crate::shared::js::{self, instrument};

/// Observer changes the engine asked for, applied to the page on the next flush.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverCommand {
    Observe(ObserverKind, EpochId),
    Disconnect(ObserverKind),
}

impl ObserverCommand {
    pub fn kind(&self) -> ObserverKind {
        match self {
            ObserverCommand::Observe(kind, _) | ObserverCommand::Disconnect(kind) => *kind,
        }
    }

    pub fn script(&self) -> String {
        match self {
            ObserverCommand::Observe(kind, epoch) => js::build_js_call(
                instrument::OBSERVE,
                &[json!(page_name(*kind)), json!(epoch.get())],
            ),
            ObserverCommand::Disconnect(kind) => {
                js::build_js_call(instrument::DISCONNECT, &[json!(page_name(*kind))])
            }
        }
    }
}

/// A Chromium tab seen through its latest probe.
///
/// The clock extrapolates from the probe's `performance.now()` with the local
/// monotonic clock and never runs backwards across probes.
pub struct ChromiumHost {
    probe: PageProbe,
    base: Duration,
    probed_at: Instant,
    commands: Vec<ObserverCommand>,
}

impl ChromiumHost {
    pub fn new(probe: PageProbe) -> Self {
        Self {
            base: from_millis_f64(probe.now),
            probe,
            probed_at: Instant::now(),
            commands: Vec::new(),
        }
    }

    pub fn probe(&self) -> &PageProbe {
        &self.probe
    }

    /// Replaces the cached state. Only valid for the same document.
    pub fn update(&mut self, probe: PageProbe) {
        let extrapolated = self.now();
        self.base = from_millis_f64(probe.now).max(extrapolated);
        self.probed_at = Instant::now();
        self.probe = probe;
    }

    pub fn take_commands(&mut self) -> Vec<ObserverCommand> {
        std::mem::take(&mut self.commands)
    }
}

impl PageHost for ChromiumHost {
    fn now(&self) -> Duration {
        self.base + self.probed_at.elapsed()
    }

    fn wall_clock_ms(&self) -> u64 {
        self.probe.wall_clock.max(0.0) as u64 + self.probed_at.elapsed().as_millis() as u64
    }

    fn current_url(&self) -> String {
        self.probe.url.clone()
    }

    fn capabilities(&self) -> CapabilityMatrix {
        self.probe.capabilities
    }

    fn document_complete(&self) -> bool {
        self.probe.ready_state == "complete"
    }

    fn navigation_timing(&self) -> Option<NavigationTiming> {
        self.probe.timing.clone()
    }

    fn first_contentful_paint(&self) -> Option<f64> {
        self.probe.fcp
    }

    fn dom_element_count(&self) -> usize {
        self.probe.element_count
    }

    fn scan_paint_candidates(&self) -> Vec<LcpCandidate> {
        self.probe.candidates.clone()
    }

    fn observe(&mut self, kind: ObserverKind, epoch: EpochId) -> Result<(), ObservationError> {
        let supported = match kind {
            ObserverKind::LayoutShift => self.probe.capabilities.layout_shift,
            ObserverKind::LargestPaint => self.probe.capabilities.largest_paint,
        };
        if !supported {
            return Err(ObservationError::Unsupported(kind.as_str()));
        }
        debug!(observer = kind.as_str(), %epoch, "observe queued");
        self.commands.push(ObserverCommand::Observe(kind, epoch));
        Ok(())
    }

    fn disconnect(&mut self, kind: ObserverKind) {
        self.commands.push(ObserverCommand::Disconnect(kind));
    }
}
