use tracing::{trace, warn};
use vitalscope_core::config::ObserverConfig;
use vitalscope_core::{EpochId, LayoutShiftEntry, ObservationError, SourceDescriptor};

use crate::host::{Fenced, ObserverKind, PageHost};
use crate::observer::{FailureOutcome, ObserverHandle, ObserverStatus};
use vitalscope_scheduler::CancellationToken;

const MAX_SOURCES: usize = 50;

/// Epoch-scoped cumulative layout shift.
pub struct LayoutShiftAccumulator {
    observer: ObserverHandle,
    value: f64,
    sources: Vec<SourceDescriptor>,
}

impl LayoutShiftAccumulator {
    pub fn new(config: &ObserverConfig) -> Self {
        Self {
            observer: ObserverHandle::new(ObserverKind::LayoutShift, config),
            value: 0.0,
            sources: Vec::new(),
        }
    }

    /// Zeroes the sum and re-subscribes so the host's session is anchored at `epoch`.
    pub fn reset<H: PageHost>(&mut self, host: &mut H, epoch: EpochId) -> Result<(), ObservationError> {
        self.value = 0.0;
        self.sources.clear();
        self.observer.start(host, epoch)
    }

    /// Adds a shift. Returns whether it counted.
    pub fn record(&mut self, shift: &Fenced<LayoutShiftEntry>) -> bool {
        if !self.observer.accepts(shift.epoch) {
            trace!(epoch = %shift.epoch, "stale layout shift discarded");
            return false;
        }
        let entry = &shift.entry;
        if entry.had_recent_input {
            return false;
        }
        if !entry.value.is_finite() || entry.value < 0.0 {
            warn!(value = entry.value, "invalid layout shift value ignored");
            return false;
        }
        self.value += entry.value;
        let room = MAX_SOURCES.saturating_sub(self.sources.len());
        self.sources.extend(entry.sources.iter().take(room).cloned());
        true
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn sources(&self) -> &[SourceDescriptor] {
        &self.sources
    }

    pub fn status(&self) -> ObserverStatus {
        self.observer.status()
    }

    pub fn is_supported(&self) -> bool {
        self.observer.status() != ObserverStatus::Unsupported
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;
    use proptest::prelude::*;
    use vitalscope_core::Rect;

    fn shift(epoch: u64, value: f64, had_recent_input: bool) -> Fenced<LayoutShiftEntry> {
        Fenced::new(
            EpochId::new(epoch),
            LayoutShiftEntry {
                value,
                had_recent_input,
                start_time: 100.0,
                sources: vec![SourceDescriptor {
                    selector: "div.hero".into(),
                    previous_rect: Rect::default(),
                    current_rect: Rect { x: 0.0, y: 40.0, width: 300.0, height: 200.0 },
                }],
            },
        )
    }

    fn armed(host: &mut FakeHost, epoch: u64) -> LayoutShiftAccumulator {
        let mut acc = LayoutShiftAccumulator::new(&ObserverConfig::default());
        acc.reset(host, EpochId::new(epoch)).unwrap();
        acc
    }

    #[test]
    fn sums_shifts_and_ignores_input_driven_ones() {
        let mut host = FakeHost::new("https://a.test/");
        let mut acc = armed(&mut host, 1);
        assert!(acc.record(&shift(1, 0.05, false)));
        assert!(!acc.record(&shift(1, 0.5, true)));
        assert!(acc.record(&shift(1, 0.02, false)));
        assert!((acc.value() - 0.07).abs() < 1e-12);
        assert_eq!(acc.sources().len(), 2);
    }

    #[test]
    fn reset_zeroes_and_resubscribes() {
        let mut host = FakeHost::new("https://a.test/");
        let mut acc = armed(&mut host, 1);
        acc.record(&shift(1, 0.3, false));
        acc.reset(&mut host, EpochId::new(2)).unwrap();
        assert_eq!(acc.value(), 0.0);
        assert!(acc.sources().is_empty());
        assert_eq!(host.observed.last(), Some(&(ObserverKind::LayoutShift, EpochId::new(2))));
        assert!(host.disconnected.contains(&ObserverKind::LayoutShift));
        // a late entry from the old page must not leak in
        assert!(!acc.record(&shift(1, 0.3, false)));
        assert_eq!(acc.value(), 0.0);
    }

    #[test]
    fn garbage_values_are_dropped() {
        let mut host = FakeHost::new("https://a.test/");
        let mut acc = armed(&mut host, 1);
        assert!(!acc.record(&shift(1, f64::NAN, false)));
        assert!(!acc.record(&shift(1, -0.1, false)));
        assert_eq!(acc.value(), 0.0);
    }

    proptest! {
        #[test]
        fn value_never_decreases_within_an_epoch(
            shifts in proptest::collection::vec((-1.0f64..2.0, any::<bool>()), 0..60)
        ) {
            let mut host = FakeHost::new("https://a.test/");
            let mut acc = armed(&mut host, 1);
            let mut last = acc.value();
            for (value, input) in shifts {
                acc.record(&shift(1, value, input));
                prop_assert!(acc.value() >= last);
                prop_assert!(acc.value() >= 0.0);
                last = acc.value();
            }
            acc.reset(&mut host, EpochId::new(2)).unwrap();
            prop_assert_eq!(acc.value(), 0.0);
        }
    }
}
