use std::time::Duration;

use tracing::{debug, trace};
use vitalscope_core::config::{CollectionConfig, ObserverConfig};
use vitalscope_core::{
    EpochId, EpochKind, LcpCandidate, LcpElementType, LcpMetric, ObservationError,
    PaintCandidateEntry,
};
use vitalscope_scheduler::CancellationToken;

use crate::host::{Fenced, ObserverKind, PageHost};
use crate::observer::{FailureOutcome, ObserverHandle, ObserverStatus};

struct Tracked {
    metric: LcpMetric,
    start_time: f64,
}

/// Current largest-paint candidate for the epoch.
///
/// The host only ever revises its choice upward, so the latest candidate wins;
/// this is deliberately not a max over sizes.
pub struct LargestPaintTracker {
    observer: ObserverHandle,
    kind: EpochKind,
    epoch_start_ms: f64,
    current: Option<Tracked>,
    previous_epoch_lcp: Option<f64>,
}

impl LargestPaintTracker {
    pub fn new(config: &ObserverConfig) -> Self {
        Self {
            observer: ObserverHandle::new(ObserverKind::LargestPaint, config),
            kind: EpochKind::FullLoad,
            epoch_start_ms: 0.0,
            current: None,
            previous_epoch_lcp: None,
        }
    }

    pub fn reset<H: PageHost>(
        &mut self,
        host: &mut H,
        epoch: EpochId,
        kind: EpochKind,
        epoch_start_ms: f64,
    ) -> Result<(), ObservationError> {
        if let Some(tracked) = self.current.take() {
            self.previous_epoch_lcp = Some(tracked.metric.value);
        }
        self.kind = kind;
        self.epoch_start_ms = epoch_start_ms;
        self.observer.start(host, epoch)
    }

    /// Takes a candidate from the host. Returns the metric if it was adopted.
    pub fn record<H: PageHost>(
        &mut self,
        host: &H,
        candidate: &Fenced<PaintCandidateEntry>,
    ) -> Option<&LcpMetric> {
        if !self.observer.accepts(candidate.epoch) {
            trace!(epoch = %candidate.epoch, "stale paint candidate discarded");
            return None;
        }
        let entry = &candidate.entry;
        if !entry.start_time.is_finite() || entry.start_time < self.epoch_start_ms {
            trace!(start_time = entry.start_time, "paint candidate predates epoch");
            return None;
        }
        if self
            .current
            .as_ref()
            .is_some_and(|c| entry.start_time < c.start_time)
        {
            trace!(start_time = entry.start_time, "out-of-order paint candidate ignored");
            return None;
        }

        let value = match self.kind {
            EpochKind::FullLoad => entry.start_time,
            EpochKind::ClientTransition => entry.start_time - self.epoch_start_ms,
        };
        let metric = match &entry.element {
            Some(element) => LcpMetric {
                value,
                element: Some(element.tag.to_ascii_lowercase()),
                selector: Some(element.selector.clone()),
                fallback: false,
            },
            None => fallback_metric(&host.scan_paint_candidates(), value),
        };
        debug!(value, selector = ?metric.selector, fallback = metric.fallback, "lcp candidate");
        self.current = Some(Tracked {
            metric,
            start_time: entry.start_time,
        });
        self.current.as_ref().map(|t| &t.metric)
    }

    pub fn current(&self) -> Option<&LcpMetric> {
        self.current.as_ref().map(|t| &t.metric)
    }

    pub fn previous_epoch_lcp(&self) -> Option<f64> {
        self.previous_epoch_lcp
    }

    pub fn status(&self) -> ObserverStatus {
        self.observer.status()
    }

    pub fn mark_unsupported(&mut self) {
        self.observer.mark_unsupported();
    }

    pub fn on_failure<H: PageHost>(&mut self, host: &mut H, epoch: EpochId) -> Option<FailureOutcome> {
        self.observer.on_failure(host, epoch)
    }

    pub fn arm_reconnect(&mut self, token: CancellationToken) {
        self.observer.arm_reconnect(token);
    }

    pub fn reconnect<H: PageHost>(&mut self, host: &mut H) -> Result<(), ObservationError> {
        self.observer.reconnect(host)
    }

    pub fn stop<H: PageHost>(&mut self, host: &mut H) {
        self.observer.stop(host);
    }
}

fn element_name(kind: LcpElementType) -> &'static str {
    match kind {
        LcpElementType::Image => "image",
        LcpElementType::Video => "video",
        LcpElementType::BackgroundImage => "background-image",
        LcpElementType::TextBlock => "text-block",
    }
}

/// Largest above-the-fold candidate by rendered area.
pub fn rank_candidates(candidates: &[LcpCandidate]) -> Option<&LcpCandidate> {
    candidates
        .iter()
        .filter(|c| c.above_fold && c.size.is_finite() && c.size > 0.0)
        .max_by(|a, b| a.size.total_cmp(&b.size))
}

/// Best-effort attribution for a value whose element the host did not give us.
pub fn fallback_metric(candidates: &[LcpCandidate], value: f64) -> LcpMetric {
    let top = rank_candidates(candidates);
    LcpMetric {
        value,
        element: top.map(|c| element_name(c.element_type).to_string()),
        selector: top.map(|c| c.selector.clone()),
        fallback: true,
    }
}

/// How long a client transition may wait for visual completion.
pub fn adaptive_wait_budget(
    previous_lcp: Option<f64>,
    element_count: usize,
    config: &CollectionConfig,
) -> Duration {
    let mut adjustment = match previous_lcp {
        Some(lcp) if lcp > 3000.0 => 1.5,
        Some(lcp) if lcp < 1000.0 => 0.8,
        _ => 1.0,
    };
    if element_count > config.complex_page_elements {
        adjustment *= 1.2;
    }
    let ms = (config.base_wait.as_millis() as f64 * adjustment).round() as u64;
    Duration::from_millis(ms).clamp(config.min_wait, config.max_wait)
}
