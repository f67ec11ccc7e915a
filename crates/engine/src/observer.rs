//! Host observers as owned resources with an epoch-scoped failure budget.

use std::time::Duration;

use tracing::{debug, warn};
use vitalscope_core::config::ObserverConfig;
use vitalscope_core::{EpochId, ObservationError};
use vitalscope_scheduler::CancellationToken;

use crate::host::{ObserverKind, PageHost};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverStatus {
    Idle,
    Active,
    Reconnecting,
    /// Gave up for the rest of the epoch (or the page, if the host lacks it).
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Reconnect { delay: Duration },
    GiveUp,
}

pub struct ObserverHandle {
    kind: ObserverKind,
    epoch: Option<EpochId>,
    status: ObserverStatus,
    failures: u32,
    max_failures: u32,
    reconnect_delay: Duration,
    reconnect: Option<CancellationToken>,
}

impl ObserverHandle {
    pub fn new(kind: ObserverKind, config: &ObserverConfig) -> Self {
        Self {
            kind,
            epoch: None,
            status: ObserverStatus::Idle,
            failures: 0,
            max_failures: config.max_failures_per_epoch.max(1),
            reconnect_delay: config.reconnect_delay,
            reconnect: None,
        }
    }

    pub fn kind(&self) -> ObserverKind {
        self.kind
    }

    pub fn status(&self) -> ObserverStatus {
        self.status
    }

    pub fn epoch(&self) -> Option<EpochId> {
        self.epoch
    }

    /// Entries are only taken from the live subscription of the current epoch.
    pub fn accepts(&self, epoch: EpochId) -> bool {
        self.status == ObserverStatus::Active && self.epoch == Some(epoch)
    }

    fn cancel_reconnect(&mut self) {
        if let Some(token) = self.reconnect.take() {
            token.cancel();
        }
    }

    /// Re-anchors the subscription at a new epoch with a fresh failure budget.
    pub fn start<H: PageHost>(&mut self, host: &mut H, epoch: EpochId) -> Result<(), ObservationError> {
        self.cancel_reconnect();
        if self.status != ObserverStatus::Idle {
            host.disconnect(self.kind);
        }
        self.epoch = Some(epoch);
        self.failures = 0;
        match host.observe(self.kind, epoch) {
            Ok(()) => {
                self.status = ObserverStatus::Active;
                debug!(observer = self.kind.as_str(), %epoch, "observer armed");
                Ok(())
            }
            Err(err) => {
                self.status = match err {
                    ObservationError::Unsupported(_) => ObserverStatus::Unsupported,
                    ObservationError::Failed { .. } => ObserverStatus::Idle,
                };
                Err(err)
            }
        }
    }

    pub fn stop<H: PageHost>(&mut self, host: &mut H) {
        self.cancel_reconnect();
        if matches!(self.status, ObserverStatus::Active | ObserverStatus::Reconnecting) {
            host.disconnect(self.kind);
        }
        self.status = ObserverStatus::Idle;
    }

    /// Marks the observer permanently unavailable for this page.
    pub fn mark_unsupported(&mut self) {
        self.cancel_reconnect();
        self.status = ObserverStatus::Unsupported;
    }

    /// Handles a subsystem failure reported for `epoch`. Stale reports return `None`.
    pub fn on_failure<H: PageHost>(&mut self, host: &mut H, epoch: EpochId) -> Option<FailureOutcome> {
        if self.epoch != Some(epoch) || self.status == ObserverStatus::Unsupported {
            return None;
        }
        self.cancel_reconnect();
        host.disconnect(self.kind);
        self.failures += 1;
        if self.failures >= self.max_failures {
            warn!(observer = self.kind.as_str(), %epoch, failures = self.failures, "observer unsupported for epoch");
            self.status = ObserverStatus::Unsupported;
            Some(FailureOutcome::GiveUp)
        } else {
            self.status = ObserverStatus::Reconnecting;
            Some(FailureOutcome::Reconnect {
                delay: self.reconnect_delay,
            })
        }
    }

    pub fn arm_reconnect(&mut self, token: CancellationToken) {
        self.cancel_reconnect();
        self.reconnect = Some(token);
    }

    /// Re-subscribes after backoff. A no-op unless a reconnect is pending.
    pub fn reconnect<H: PageHost>(&mut self, host: &mut H) -> Result<(), ObservationError> {
        self.reconnect = None;
        let (ObserverStatus::Reconnecting, Some(epoch)) = (self.status, self.epoch) else {
            return Ok(());
        };
        host.observe(self.kind, epoch)?;
        self.status = ObserverStatus::Active;
        debug!(observer = self.kind.as_str(), %epoch, "observer reconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;

    fn handle() -> ObserverHandle {
        ObserverHandle::new(ObserverKind::LayoutShift, &ObserverConfig::default())
    }

    #[test]
    fn one_retry_then_unsupported() {
        let mut host = FakeHost::new("https://a.test/");
        let mut h = handle();
        let epoch = EpochId::new(1);
        h.start(&mut host, epoch).unwrap();
        assert!(h.accepts(epoch));

        let first = h.on_failure(&mut host, epoch);
        assert_eq!(first, Some(FailureOutcome::Reconnect { delay: Duration::from_secs(2) }));
        assert!(!h.accepts(epoch));
        h.reconnect(&mut host).unwrap();
        assert!(h.accepts(epoch));

        assert_eq!(h.on_failure(&mut host, epoch), Some(FailureOutcome::GiveUp));
        assert_eq!(h.status(), ObserverStatus::Unsupported);
        assert_eq!(h.on_failure(&mut host, epoch), None);
    }

    #[test]
    fn new_epoch_restores_the_budget() {
        let mut host = FakeHost::new("https://a.test/");
        let mut h = handle();
        h.start(&mut host, EpochId::new(1)).unwrap();
        h.on_failure(&mut host, EpochId::new(1));
        h.on_failure(&mut host, EpochId::new(1));
        assert_eq!(h.status(), ObserverStatus::Unsupported);

        h.start(&mut host, EpochId::new(2)).unwrap();
        assert!(h.accepts(EpochId::new(2)));
        assert!(!h.accepts(EpochId::new(1)));
        assert_eq!(h.on_failure(&mut host, EpochId::new(1)), None);
    }

    #[test]
    fn restart_cancels_pending_reconnect() {
        let mut host = FakeHost::new("https://a.test/");
        let mut h = handle();
        h.start(&mut host, EpochId::new(1)).unwrap();
        h.on_failure(&mut host, EpochId::new(1));
        let token = CancellationToken::new();
        h.arm_reconnect(token.clone());
        h.start(&mut host, EpochId::new(2)).unwrap();
        assert!(token.is_cancelled());
    }
}
