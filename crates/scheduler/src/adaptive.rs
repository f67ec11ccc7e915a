use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, trace};
use vitalscope_core::config::{MetricThresholds, UpdateConfig};
use vitalscope_core::MetricSnapshot;

/// Outcome of one recomputation.
#[derive(Debug, Clone)]
pub struct UpdateDecision {
    /// The snapshot to broadcast, sequence already assigned. `None` when suppressed.
    pub broadcast: Option<MetricSnapshot>,
    pub changed_fields: Vec<&'static str>,
    pub next_interval: Duration,
}

/// Decides whether a recomputed snapshot is worth re-broadcasting and how
/// soon to recompute again.
pub struct AdaptiveUpdateScheduler {
    config: UpdateConfig,
    previous: Option<MetricSnapshot>,
    sequence: u64,
    interval: Duration,
    history: VecDeque<bool>,
}

impl AdaptiveUpdateScheduler {
    pub fn new(config: UpdateConfig) -> Self {
        let interval = config.base_interval;
        Self {
            config,
            previous: None,
            sequence: 0,
            interval,
            history: VecDeque::new(),
        }
    }

    /// Forgets everything about the previous epoch.
    pub fn reset(&mut self) {
        self.previous = None;
        self.sequence = 0;
        self.interval = self.config.base_interval;
        self.history.clear();
    }

    /// Makes the next evaluation broadcast unconditionally.
    pub fn force_next(&mut self) {
        self.previous = None;
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_broadcast(&self) -> Option<&MetricSnapshot> {
        self.previous.as_ref()
    }

    pub fn evaluate(
        &mut self,
        mut snapshot: MetricSnapshot,
        since_last_mutation: Option<Duration>,
    ) -> UpdateDecision {
        let changed_fields = match &self.previous {
            None => vec!["initial"],
            Some(prev) => changed_fields(prev, &snapshot, &self.config.thresholds),
        };
        let changed = !changed_fields.is_empty();

        self.history.push_back(changed);
        while self.history.len() > self.config.history_len.max(1) {
            self.history.pop_front();
        }
        self.interval = self.next_interval(changed, since_last_mutation);

        let broadcast = if changed {
            self.sequence += 1;
            snapshot.update_sequence = self.sequence;
            debug!(
                epoch = %snapshot.epoch_id,
                sequence = self.sequence,
                fields = ?changed_fields,
                next_ms = self.interval.as_millis() as u64,
                "metrics changed"
            );
            self.previous = Some(snapshot.clone());
            Some(snapshot)
        } else {
            trace!(
                epoch = %snapshot.epoch_id,
                next_ms = self.interval.as_millis() as u64,
                "metrics unchanged, suppressed"
            );
            None
        };

        UpdateDecision {
            broadcast,
            changed_fields,
            next_interval: self.interval,
        }
    }

    fn next_interval(&self, changed: bool, since_last_mutation: Option<Duration>) -> Duration {
        let cfg = &self.config;
        let mut factor = if changed {
            cfg.unstable_factor
        } else {
            cfg.stable_factor
        };

        let streak = cfg.quiet_streak;
        if streak > 0
            && self.history.len() >= streak
            && self.history.iter().rev().take(streak).all(|changed| !changed)
        {
            factor *= 1.2;
        }

        match since_last_mutation {
            Some(d) if d < Duration::from_secs(1) => factor *= 0.8,
            Some(d) if d > Duration::from_secs(5) => factor *= 1.2,
            _ => {}
        }

        let ms = (self.interval.as_millis() as f64 * factor).round().max(0.0) as u64;
        Duration::from_millis(ms).clamp(cfg.min_interval, cfg.max_interval)
    }
}

fn significant(prev: Option<f64>, next: Option<f64>, absolute: f64, relative: f64) -> bool {
    match (prev, next) {
        (None, None) => false,
        (Some(_), None) | (None, Some(_)) => true,
        (Some(a), Some(b)) => {
            // The absolute threshold must be crossed; away from zero the
            // relative floor applies as well.
            let diff = (b - a).abs();
            diff > absolute && (a == 0.0 || diff / a.abs() > relative)
        }
    }
}

/// Names of the fields whose change crosses its threshold.
pub fn changed_fields(
    prev: &MetricSnapshot,
    next: &MetricSnapshot,
    t: &MetricThresholds,
) -> Vec<&'static str> {
    let checks: [(&'static str, Option<f64>, Option<f64>, f64); 7] = [
        ("ttfb", prev.ttfb, next.ttfb, t.ttfb),
        ("fcp", prev.fcp, next.fcp, t.fcp),
        ("lcp", prev.lcp_value(), next.lcp_value(), t.lcp),
        ("cls", prev.cls, next.cls, t.cls),
        ("domLoadTime", prev.dom_load_time, next.dom_load_time, t.other),
        ("navigationDuration", prev.navigation_duration, next.navigation_duration, t.other),
        (
            "visualCompletionTime",
            prev.visual_completion_time,
            next.visual_completion_time,
            t.other,
        ),
    ];
    let mut fields: Vec<&'static str> = checks
        .into_iter()
        .filter(|(_, a, b, abs)| significant(*a, *b, *abs, t.relative))
        .map(|(name, ..)| name)
        .collect();
    if prev.estimated != next.estimated {
        fields.push("estimated");
    }
    fields
}
