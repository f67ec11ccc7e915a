//! Frame-by-frame visual stability for client transitions.
//!
//! Each animation frame contributes a [`FrameSample`]. Stability is judged
//! over a short sliding window by counting how many consecutive pairs of
//! samples differ by more than a per-signal delta.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, info, trace};
use vitalscope_core::config::StabilityConfig;
use vitalscope_core::FrameSample;

/// Share of unchanged consecutive pairs per signal, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StabilityRatios {
    pub content: f64,
    pub layout: f64,
    pub resources: f64,
}

impl StabilityRatios {
    pub fn overall(&self) -> f64 {
        (self.content + self.layout + self.resources) / 3.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    ContentAndLayout,
    ResourcesQuiet,
    OverallScore,
    Ceiling,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualCompletion {
    /// Time since the detector started.
    pub elapsed: Duration,
    /// Host time of the deciding sample, or of the ceiling.
    pub at: Duration,
    pub timed_out: bool,
    pub reason: CompletionReason,
    pub ratios: StabilityRatios,
}

pub struct VisualStabilityDetector {
    config: StabilityConfig,
    window: VecDeque<FrameSample>,
    started_at: Option<Duration>,
    completion: Option<VisualCompletion>,
}

impl VisualStabilityDetector {
    pub fn new(config: StabilityConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window_size),
            config,
            started_at: None,
            completion: None,
        }
    }

    pub fn start(&mut self, now: Duration) {
        self.reset();
        self.started_at = Some(now);
        debug!(start_ms = now.as_millis() as u64, "stability sampling started");
    }

    /// Stops sampling but keeps any completion already reached.
    pub fn stop(&mut self) {
        self.started_at = None;
        self.window.clear();
    }

    pub fn reset(&mut self) {
        self.started_at = None;
        self.window.clear();
        self.completion = None;
    }

    pub fn is_sampling(&self) -> bool {
        self.started_at.is_some() && self.completion.is_none()
    }

    pub fn completion(&self) -> Option<&VisualCompletion> {
        self.completion.as_ref()
    }

    pub fn ratios(&self) -> StabilityRatios {
        let comparisons = self.window.len().saturating_sub(1);
        if comparisons == 0 {
            return StabilityRatios::default();
        }
        let cfg = &self.config;
        let (mut content, mut layout, mut resources) = (0usize, 0usize, 0usize);
        for (a, b) in self.window.iter().zip(self.window.iter().skip(1)) {
            if a.content_byte_length.abs_diff(b.content_byte_length) > cfg.content_delta {
                content += 1;
            }
            if (a.scroll_height - b.scroll_height).abs() > cfg.layout_delta {
                layout += 1;
            }
            if a.resource_count().abs_diff(b.resource_count()) > cfg.resource_delta {
                resources += 1;
            }
        }
        let ratio = |changed: usize| 1.0 - changed as f64 / comparisons as f64;
        StabilityRatios {
            content: ratio(content),
            layout: ratio(layout),
            resources: ratio(resources),
        }
    }

    /// Feeds one frame. Returns the completion the first time it is reached.
    pub fn sample(
        &mut self,
        frame: FrameSample,
        last_mutation: Option<Duration>,
    ) -> Option<VisualCompletion> {
        let started_at = self.started_at?;
        if self.completion.is_some() || frame.time < started_at {
            return None;
        }
        let now = frame.time;
        self.window.push_back(frame);
        while self.window.len() > self.config.window_size.max(2) {
            self.window.pop_front();
        }
        if self.window.len() < self.config.min_samples.max(2) {
            return None;
        }

        let elapsed = now - started_at;
        let ratios = self.ratios();
        let cfg = &self.config;
        let stable = |r: f64| r >= cfg.stable_ratio;
        let quiet_for = last_mutation.map_or(elapsed, |t| now.saturating_sub(t));
        trace!(
            elapsed_ms = elapsed.as_millis() as u64,
            content = ratios.content,
            layout = ratios.layout,
            resources = ratios.resources,
            "stability sample"
        );

        let reason = if stable(ratios.content)
            && stable(ratios.layout)
            && elapsed > cfg.content_layout_min_elapsed
        {
            CompletionReason::ContentAndLayout
        } else if stable(ratios.resources)
            && quiet_for > cfg.mutation_quiet
            && elapsed > cfg.resource_min_elapsed
        {
            CompletionReason::ResourcesQuiet
        } else if ratios.overall() > cfg.overall_ratio && elapsed > cfg.overall_min_elapsed {
            CompletionReason::OverallScore
        } else {
            return None;
        };
        Some(self.complete(now, elapsed, false, reason, ratios))
    }

    /// Forces completion at the hard ceiling. No-op once complete.
    pub fn force_timeout(&mut self, at: Duration) -> Option<VisualCompletion> {
        let started_at = self.started_at?;
        if self.completion.is_some() {
            return None;
        }
        let ratios = self.ratios();
        Some(self.complete(at, at.saturating_sub(started_at), true, CompletionReason::Ceiling, ratios))
    }

    fn complete(
        &mut self,
        at: Duration,
        elapsed: Duration,
        timed_out: bool,
        reason: CompletionReason,
        ratios: StabilityRatios,
    ) -> VisualCompletion {
        let completion = VisualCompletion {
            elapsed,
            at,
            timed_out,
            reason,
            ratios,
        };
        info!(
            elapsed_ms = elapsed.as_millis() as u64,
            timed_out,
            reason = ?reason,
            "visually complete"
        );
        self.completion = Some(completion);
        completion
    }
}
