use std::collections::VecDeque;
use std::time::Duration;

use vitalscope_core::{
    CapabilityMatrix, EpochId, LcpCandidate, NavigationTiming, ObservationError,
};

use crate::host::{ObserverKind, PageHost};

/// Scriptable page with a hand-driven clock.
pub struct FakeHost {
    pub now: Duration,
    pub url: String,
    pub capabilities: CapabilityMatrix,
    pub complete: bool,
    pub timing: Option<NavigationTiming>,
    /// The timing entry stays unpopulated before this instant.
    pub timing_ready_at: Duration,
    pub fcp: Option<f64>,
    pub elements: usize,
    pub candidates: Vec<LcpCandidate>,
    pub observed: Vec<(ObserverKind, EpochId)>,
    pub disconnected: Vec<ObserverKind>,
    pub observe_failures: VecDeque<ObservationError>,
}

impl FakeHost {
    pub fn new(url: &str) -> Self {
        Self {
            now: Duration::ZERO,
            url: url.to_string(),
            capabilities: CapabilityMatrix::full(),
            complete: false,
            timing: None,
            timing_ready_at: Duration::ZERO,
            fcp: None,
            elements: 200,
            candidates: Vec::new(),
            observed: Vec::new(),
            disconnected: Vec::new(),
            observe_failures: VecDeque::new(),
        }
    }

    pub fn set_time(&mut self, ms: u64) {
        self.now = Duration::from_millis(ms);
    }
}

impl PageHost for FakeHost {
    fn now(&self) -> Duration {
        self.now
    }

    fn wall_clock_ms(&self) -> u64 {
        1_700_000_000_000 + self.now.as_millis() as u64
    }

    fn current_url(&self) -> String {
        self.url.clone()
    }

    fn capabilities(&self) -> CapabilityMatrix {
        self.capabilities
    }

    fn document_complete(&self) -> bool {
        self.complete
    }

    fn navigation_timing(&self) -> Option<NavigationTiming> {
        if self.now < self.timing_ready_at {
            return Some(NavigationTiming::default());
        }
        self.timing.clone()
    }

    fn first_contentful_paint(&self) -> Option<f64> {
        self.fcp
    }

    fn dom_element_count(&self) -> usize {
        self.elements
    }

    fn scan_paint_candidates(&self) -> Vec<LcpCandidate> {
        self.candidates.clone()
    }

    fn observe(&mut self, kind: ObserverKind, epoch: EpochId) -> Result<(), ObservationError> {
        let supported = match kind {
            ObserverKind::LayoutShift => self.capabilities.layout_shift,
            ObserverKind::LargestPaint => self.capabilities.largest_paint,
        };
        if !supported {
            return Err(ObservationError::Unsupported(kind.as_str()));
        }
        if let Some(err) = self.observe_failures.pop_front() {
            return Err(err);
        }
        self.observed.push((kind, epoch));
        Ok(())
    }

    fn disconnect(&mut self, kind: ObserverKind) {
        self.disconnected.push(kind);
    }
}
