//! Fuses history interception, popstate, the navigate event and URL polling
//! into one debounced "navigation occurred" signal.

use std::time::Duration;

use tracing::{debug, trace};
use vitalscope_core::config::NavigationConfig;
use vitalscope_core::{HistoryCall, NavigateType, NavigationSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// A settle check should run at the given time.
    Scheduled(Duration),
    /// Folded into the settle check already pending.
    Coalesced,
    /// First URL observation after attach; taken as the baseline.
    Suppressed,
    /// Nothing changed or the signal type does not navigate.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedNavigation {
    pub url: String,
    pub previous_url: String,
    pub source: NavigationSource,
    pub at: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    Accepted(AcceptedNavigation),
    /// Too close to the previous accepted navigation; check again then.
    Deferred(Duration),
    Unchanged,
    /// No settle check was pending.
    Idle,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    deadline: Duration,
    source: NavigationSource,
}

pub struct NavigationChangeDetector {
    config: NavigationConfig,
    baseline: Option<String>,
    pending: Option<Pending>,
    last_accepted: Option<Duration>,
}

impl NavigationChangeDetector {
    pub fn new(config: NavigationConfig) -> Self {
        Self {
            config,
            baseline: None,
            pending: None,
            last_accepted: None,
        }
    }

    pub fn baseline(&self) -> Option<&str> {
        self.baseline.as_deref()
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_deadline(&self) -> Option<Duration> {
        self.pending.map(|p| p.deadline)
    }

    /// Records the URL the script attached to. It is the initial load, never a transition.
    pub fn observe_initial(&mut self, url: &str) {
        self.baseline = Some(url.to_string());
        self.pending = None;
    }

    pub fn handle_candidate(&mut self, source: NavigationSource, now: Duration) -> CandidateOutcome {
        if let Some(pending) = &self.pending {
            trace!(source = ?source, first = ?pending.source, "navigation candidate coalesced");
            return CandidateOutcome::Coalesced;
        }
        let deadline = now + self.config.debounce;
        self.pending = Some(Pending { deadline, source });
        debug!(source = ?source, deadline_ms = deadline.as_millis() as u64, "navigation candidate");
        CandidateOutcome::Scheduled(deadline)
    }

    pub fn history_call(&mut self, call: HistoryCall, now: Duration) -> CandidateOutcome {
        let source = match call {
            HistoryCall::PushState => NavigationSource::HistoryPush,
            HistoryCall::ReplaceState => NavigationSource::HistoryReplace,
        };
        self.handle_candidate(source, now)
    }

    pub fn popstate(&mut self, now: Duration) -> CandidateOutcome {
        self.handle_candidate(NavigationSource::PopState, now)
    }

    /// Reloads are full loads and restart the script; only in-document types count.
    pub fn navigate_event(&mut self, kind: NavigateType, now: Duration) -> CandidateOutcome {
        match kind {
            NavigateType::Reload => CandidateOutcome::Ignored,
            NavigateType::Push | NavigateType::Replace | NavigateType::Traverse => {
                self.handle_candidate(NavigationSource::NavigateEvent, now)
            }
        }
    }

    /// Fallback for routers that bypass every other signal.
    pub fn poll(&mut self, url: &str, now: Duration) -> CandidateOutcome {
        match &self.baseline {
            None => {
                self.baseline = Some(url.to_string());
                CandidateOutcome::Suppressed
            }
            Some(known) if known == url => CandidateOutcome::Ignored,
            Some(_) => self.handle_candidate(NavigationSource::Polling, now),
        }
    }

    /// Runs the debounced check against the URL the page shows now.
    pub fn settle(&mut self, current_url: &str, now: Duration) -> SettleOutcome {
        let Some(pending) = self.pending.take() else {
            return SettleOutcome::Idle;
        };
        let Some(previous) = self.baseline.clone() else {
            self.baseline = Some(current_url.to_string());
            return SettleOutcome::Unchanged;
        };
        if previous == current_url {
            trace!(url = current_url, "navigation signal without url change");
            return SettleOutcome::Unchanged;
        }
        if let Some(last) = self.last_accepted {
            let earliest = last + self.config.min_interval;
            if now < earliest {
                self.pending = Some(Pending {
                    deadline: earliest,
                    source: pending.source,
                });
                debug!(retry_ms = earliest.as_millis() as u64, "navigation deferred by minimum interval");
                return SettleOutcome::Deferred(earliest);
            }
        }
        self.baseline = Some(current_url.to_string());
        self.last_accepted = Some(now);
        SettleOutcome::Accepted(AcceptedNavigation {
            url: current_url.to_string(),
            previous_url: previous,
            source: pending.source,
            at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn attached(url: &str) -> NavigationChangeDetector {
        let mut d = NavigationChangeDetector::new(NavigationConfig::default());
        d.observe_initial(url);
        d
    }

    #[test]
    fn burst_of_signals_yields_one_navigation() {
        let mut d = attached("https://shop.test/");
        assert_eq!(d.history_call(HistoryCall::PushState, ms(1000)), CandidateOutcome::Scheduled(ms(1100)));
        assert_eq!(d.history_call(HistoryCall::ReplaceState, ms(1020)), CandidateOutcome::Coalesced);
        assert_eq!(d.navigate_event(NavigateType::Push, ms(1030)), CandidateOutcome::Coalesced);
        assert_eq!(d.poll("https://shop.test/cart", ms(1040)), CandidateOutcome::Coalesced);

        match d.settle("https://shop.test/cart", ms(1100)) {
            SettleOutcome::Accepted(nav) => {
                assert_eq!(nav.previous_url, "https://shop.test/");
                assert_eq!(nav.source, NavigationSource::HistoryPush);
            }
            other => panic!("expected accepted navigation, got {other:?}"),
        }
        assert_eq!(d.settle("https://shop.test/cart", ms(1100)), SettleOutcome::Idle);
        assert_eq!(d.poll("https://shop.test/cart", ms(1200)), CandidateOutcome::Ignored);
    }

    #[test]
    fn first_poll_without_attach_is_suppressed() {
        let mut d = NavigationChangeDetector::new(NavigationConfig::default());
        assert_eq!(d.poll("https://a.test/", ms(200)), CandidateOutcome::Suppressed);
        assert_eq!(d.baseline(), Some("https://a.test/"));
    }

    #[test]
    fn replace_without_url_change_is_not_a_navigation() {
        let mut d = attached("https://a.test/x");
        d.history_call(HistoryCall::ReplaceState, ms(10));
        assert_eq!(d.settle("https://a.test/x", ms(110)), SettleOutcome::Unchanged);
    }

    #[test]
    fn reload_is_ignored() {
        let mut d = attached("https://a.test/");
        assert_eq!(d.navigate_event(NavigateType::Reload, ms(0)), CandidateOutcome::Ignored);
        assert!(!d.has_pending());
    }

    #[test]
    fn minimum_interval_defers_second_navigation() {
        let mut d = attached("https://a.test/");
        d.history_call(HistoryCall::PushState, ms(0));
        assert!(matches!(d.settle("https://a.test/1", ms(100)), SettleOutcome::Accepted(_)));

        d.popstate(ms(200));
        assert_eq!(d.settle("https://a.test/", ms(300)), SettleOutcome::Deferred(ms(600)));
        assert!(d.has_pending());
        match d.settle("https://a.test/", ms(600)) {
            SettleOutcome::Accepted(nav) => {
                assert_eq!(nav.source, NavigationSource::PopState);
                assert_eq!(nav.at, ms(600));
            }
            other => panic!("expected accepted navigation, got {other:?}"),
        }
    }
}
