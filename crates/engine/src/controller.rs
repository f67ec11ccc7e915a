//! The navigation-epoch state machine.
//!
//! One epoch is current at a time. Every host callback and every timer is
//! checked against it, and [`NavigationEpochController::begin_epoch`] resets
//! all child state before anything for the new epoch can run.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, info, trace, warn};
use vitalscope_core::{
    CapabilityMatrix, Epoch, EpochId, EpochKind, EpochPhase, EngineConfig, FrameSample,
    HistoryCall, InboundCommand, LayoutShiftEntry, MetricSnapshot, MutationRecord, NavigateType,
    NavigationTiming, ObservationError, OutboundMessage, PaintCandidateEntry, VitalsError,
    model::as_millis_f64,
};
use vitalscope_scheduler::{AdaptiveUpdateScheduler, CancellationToken, TimerQueue};

use crate::host::{Fenced, ObserverKind, PageHost, is_restricted_url};
use crate::largest_paint::{LargestPaintTracker, adaptive_wait_budget};
use crate::layout_shift::LayoutShiftAccumulator;
use crate::mutation::ContentMutationScorer;
use crate::navigation::{CandidateOutcome, NavigationChangeDetector, SettleOutcome};
use crate::observer::FailureOutcome;
use crate::stability::{VisualCompletion, VisualStabilityDetector};
use crate::validation::sanitize;

/// The ceiling is configurable but never beyond this.
const MAX_HARD_CEILING: Duration = Duration::from_secs(12);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    NavigationPoll,
    NavigationSettle,
    Collect,
    StabilityCeiling,
    ScoringWindow,
    Reconnect(ObserverKind),
    Update,
}

struct EpochState {
    epoch: Epoch,
    phase: EpochPhase,
    timing_failures: u32,
    wait_budget: Duration,
    /// Navigation duration frozen at the first estimate.
    estimated_duration: Option<f64>,
    next_update: Option<(Duration, CancellationToken)>,
}

impl EpochState {
    fn new(epoch: Epoch, phase: EpochPhase) -> Self {
        Self {
            epoch,
            phase,
            timing_failures: 0,
            wait_budget: Duration::ZERO,
            estimated_duration: None,
            next_update: None,
        }
    }

    fn cancel_update(&mut self) {
        if let Some((_, token)) = self.next_update.take() {
            token.cancel();
        }
    }
}

pub struct NavigationEpochController<H: PageHost> {
    host: H,
    config: EngineConfig,
    timers: TimerQueue<TimerAction>,
    outbox: VecDeque<OutboundMessage>,
    navigation: NavigationChangeDetector,
    layout_shift: LayoutShiftAccumulator,
    largest_paint: LargestPaintTracker,
    mutations: ContentMutationScorer,
    stability: VisualStabilityDetector,
    updates: AdaptiveUpdateScheduler,
    capabilities: CapabilityMatrix,
    state: Option<EpochState>,
    last_epoch: EpochId,
    cls_debugger: bool,
}

impl<H: PageHost> NavigationEpochController<H> {
    pub fn new(host: H, config: EngineConfig) -> Self {
        Self {
            navigation: NavigationChangeDetector::new(config.navigation.clone()),
            layout_shift: LayoutShiftAccumulator::new(&config.observer),
            largest_paint: LargestPaintTracker::new(&config.observer),
            mutations: ContentMutationScorer::new(config.mutation.clone()),
            stability: VisualStabilityDetector::new(config.stability.clone()),
            updates: AdaptiveUpdateScheduler::new(config.update.clone()),
            host,
            config,
            timers: TimerQueue::new(),
            outbox: VecDeque::new(),
            capabilities: CapabilityMatrix::default(),
            state: None,
            last_epoch: EpochId::new(0),
            cls_debugger: false,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn phase(&self) -> EpochPhase {
        self.state.as_ref().map_or(EpochPhase::Idle, |s| s.phase)
    }

    pub fn current_epoch(&self) -> Option<&Epoch> {
        self.state.as_ref().map(|s| &s.epoch)
    }

    fn current_id(&self) -> Option<EpochId> {
        self.state.as_ref().map(|s| s.epoch.id)
    }

    fn is_live(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|s| s.phase != EpochPhase::Degraded)
    }

    pub fn cls(&self) -> f64 {
        self.layout_shift.value()
    }

    pub fn cls_debugger_enabled(&self) -> bool {
        self.cls_debugger
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    pub fn drain_outbox(&mut self) -> Vec<OutboundMessage> {
        self.outbox.drain(..).collect()
    }

    fn emit(&mut self, message: OutboundMessage) {
        trace!(kind = message.kind(), "queued");
        self.outbox.push_back(message);
    }

    fn emit_error(&mut self, error: &VitalsError, url: &str) {
        let timestamp = self.host.wall_clock_ms();
        self.emit(OutboundMessage::metrics_error(error, url, timestamp));
    }

    /// Probes the page and starts the first epoch.
    ///
    /// Restricted pages are reported and left uninstrumented.
    pub fn attach(&mut self) -> Result<EpochId, VitalsError> {
        let url = self.host.current_url();
        if is_restricted_url(&url) {
            let err = VitalsError::page_unsupported(url.as_str());
            warn!(url = %url, "page does not allow instrumentation");
            self.emit_error(&err, &url);
            return Err(err);
        }

        self.capabilities = self.host.capabilities();
        if self.capabilities.is_degraded() {
            return Ok(self.enter_degraded(url));
        }
        for gap in self.capabilities.missing() {
            let err = VitalsError::capability_unsupported(gap);
            warn!(capability = gap, "capability missing");
            self.emit_error(&err, &url);
        }

        self.navigation.observe_initial(&url);
        let poll_at = self.host.now() + self.navigation.poll_interval();
        self.timers.schedule(poll_at, None, TimerAction::NavigationPoll);
        Ok(self.begin_epoch(EpochKind::FullLoad, url))
    }

    fn enter_degraded(&mut self, url: String) -> EpochId {
        let id = self.last_epoch.next();
        self.last_epoch = id;
        warn!(url = %url, "no instrumentation available, reporting estimates only");
        let epoch = Epoch::new(id, EpochKind::FullLoad, Duration::ZERO, url.clone());
        self.state = Some(EpochState::new(epoch, EpochPhase::Degraded));

        let err = VitalsError::capability_unsupported("performance")
            .with_context(serde_json::json!({ "missing": self.capabilities.missing() }));
        self.emit_error(&err, &url);
        if let Some(snapshot) = self.compose_estimated() {
            let decision = self.updates.evaluate(sanitize(snapshot), None);
            if let Some(data) = decision.broadcast {
                self.emit(OutboundMessage::PerformanceMetrics { data });
            }
        }
        if let Some(state) = self.state.as_mut() {
            state.epoch.metrics_collected = true;
        }
        id
    }

    /// Supersedes the current epoch. Child state is reset before this returns.
    pub fn begin_epoch(&mut self, kind: EpochKind, url: String) -> EpochId {
        let now = self.host.now();
        let id = self.last_epoch.next();
        self.last_epoch = id;
        if let Some(mut previous) = self.state.take() {
            previous.cancel_update();
            debug!(epoch = %previous.epoch.id, "epoch superseded");
        }
        self.timers.retain_epoch(id);

        // A full load began at the time origin; buffered entries belong to it.
        let start = match kind {
            EpochKind::FullLoad => Duration::ZERO,
            EpochKind::ClientTransition => now,
        };
        let epoch = Epoch::new(id, kind, start, url.clone());
        self.mutations.reset();
        self.stability.reset();
        self.updates.reset();
        let shift = self.layout_shift.reset(&mut self.host, id);
        self.observer_started(ObserverKind::LayoutShift, id, shift);
        let paint = self
            .largest_paint
            .reset(&mut self.host, id, kind, epoch.start_ms());
        self.observer_started(ObserverKind::LargestPaint, id, paint);

        info!(epoch = %id, kind = ?kind, url = %url, "epoch started");
        let timestamp = self.host.wall_clock_ms();
        self.emit(OutboundMessage::MetricsLoading { url, timestamp });

        let mut state = EpochState::new(epoch, EpochPhase::Initializing);
        match kind {
            EpochKind::FullLoad => {
                let complete = self.host.document_complete();
                if !complete {
                    state.phase = EpochPhase::Observing;
                }
                self.state = Some(state);
                if complete {
                    self.collect();
                }
            }
            EpochKind::ClientTransition => {
                let collection = &self.config.collection;
                state.wait_budget = adaptive_wait_budget(
                    self.largest_paint.previous_epoch_lcp(),
                    self.host.dom_element_count(),
                    collection,
                )
                .min(collection.transition_max_wait);
                state.phase = EpochPhase::Observing;
                debug!(epoch = %id, budget_ms = state.wait_budget.as_millis() as u64, "transition wait budget");

                let ceiling = self.config.stability.hard_ceiling.min(MAX_HARD_CEILING);
                self.stability.start(now);
                self.timers
                    .schedule(now + ceiling, Some(id), TimerAction::StabilityCeiling);
                self.timers.schedule(
                    now + collection.transition_poll_interval,
                    Some(id),
                    TimerAction::Collect,
                );
                self.state = Some(state);
            }
        }
        id
    }

    fn observer_started(&mut self, kind: ObserverKind, epoch: EpochId, result: Result<(), ObservationError>) {
        match result {
            Ok(()) => {}
            // Reported once at attach.
            Err(ObservationError::Unsupported(_)) => {
                debug!(observer = kind.as_str(), %epoch, "observer unavailable");
            }
            Err(err) => {
                warn!(observer = kind.as_str(), %epoch, error = %err, "observer failed to start");
                self.handle_observer_failure(kind, epoch, err);
            }
        }
    }

    /// The host finished loading the document.
    pub fn on_load(&mut self) {
        let waiting = self.state.as_ref().is_some_and(|s| {
            s.epoch.kind == EpochKind::FullLoad
                && s.phase == EpochPhase::Observing
                && !s.epoch.metrics_collected
        });
        if waiting {
            debug!("load event");
            self.collect();
        }
    }

    /// Reads what the epoch has so far and reports it, or arranges to try again.
    pub fn collect(&mut self) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if state.phase == EpochPhase::Degraded || state.epoch.metrics_collected {
            return;
        }
        let id = state.epoch.id;
        let now = self.host.now();
        let collection = &self.config.collection;

        match state.epoch.kind {
            EpochKind::FullLoad => match self.host.navigation_timing() {
                Some(timing) if timing.is_populated() => {
                    let snapshot = self.compose_full_load(&timing);
                    self.report(snapshot);
                }
                _ => {
                    state.timing_failures += 1;
                    if state.timing_failures > collection.timing_max_retries {
                        warn!(epoch = %id, attempts = state.timing_failures, "navigation timing never populated, estimating");
                        let snapshot = self.compose_estimated();
                        self.report(snapshot);
                    } else {
                        debug!(epoch = %id, attempt = state.timing_failures, "navigation timing not ready");
                        let at = now + collection.timing_retry_interval;
                        self.timers.schedule(at, Some(id), TimerAction::Collect);
                    }
                }
            },
            EpochKind::ClientTransition => {
                if self.stability.completion().is_some() {
                    let snapshot = self.compose_transition();
                    self.report(snapshot);
                } else if state.epoch.elapsed(now) >= state.wait_budget {
                    info!(epoch = %id, budget_ms = state.wait_budget.as_millis() as u64, "wait budget elapsed before visual completion");
                    let snapshot = self.compose_transition();
                    self.report(snapshot);
                } else {
                    let at = now + collection.transition_poll_interval;
                    self.timers.schedule(at, Some(id), TimerAction::Collect);
                }
            }
        }
    }

    fn cls_metric(&self) -> Option<f64> {
        (self.capabilities.layout_shift && self.layout_shift.is_supported())
            .then(|| self.layout_shift.value())
    }

    fn base_snapshot(&self) -> Option<MetricSnapshot> {
        let state = self.state.as_ref()?;
        let mut snapshot = MetricSnapshot::empty(&state.epoch, self.host.wall_clock_ms());
        snapshot.lcp = self.largest_paint.current().cloned();
        snapshot.cls = self.cls_metric();
        Some(snapshot)
    }

    fn compose_full_load(&self, timing: &NavigationTiming) -> Option<MetricSnapshot> {
        let mut snapshot = self.base_snapshot()?;
        let activation = timing.activation_start.max(0.0);
        snapshot.ttfb = Some((timing.response_start - activation).max(0.0));
        snapshot.fcp = self
            .host
            .first_contentful_paint()
            .map(|fcp| (fcp - activation).max(0.0));
        snapshot.dom_load_time = Some(timing.dom_content_loaded_event_end - timing.fetch_start);
        snapshot.navigation_duration = Some(if timing.duration > 0.0 {
            timing.duration
        } else {
            timing.load_event_end - timing.fetch_start
        });
        Some(snapshot)
    }

    fn compose_estimated(&mut self) -> Option<MetricSnapshot> {
        let now = self.host.now();
        let fcp = self.host.first_contentful_paint();
        let mut snapshot = self.base_snapshot()?;
        let state = self.state.as_mut()?;
        let elapsed = as_millis_f64(state.epoch.elapsed(now));
        let duration = *state.estimated_duration.get_or_insert(elapsed);
        snapshot.fcp = fcp;
        snapshot.navigation_duration = Some(duration);
        snapshot.estimated = true;
        Some(snapshot)
    }

    fn compose_transition(&self) -> Option<MetricSnapshot> {
        let mut snapshot = self.base_snapshot()?;
        let start = self.state.as_ref()?.epoch.start;
        let since_start = |t: Duration| as_millis_f64(t.saturating_sub(start));
        snapshot.fcp = self.mutations.first_content_time().map(since_start);
        if let Some(completion) = self.stability.completion() {
            let elapsed = as_millis_f64(completion.elapsed);
            snapshot.visual_completion_time = Some(elapsed);
            snapshot.visual_completion_timeout = completion.timed_out;
            snapshot.navigation_duration = Some(elapsed);
            snapshot.dom_load_time = self
                .mutations
                .last_mutation_time()
                .filter(|t| *t <= completion.at)
                .map(since_start);
        }
        Some(snapshot)
    }

    /// Recomputes the epoch's snapshot in its current shape.
    fn compose_current(&mut self) -> Option<MetricSnapshot> {
        let state = self.state.as_ref()?;
        match (state.phase, state.epoch.kind) {
            (EpochPhase::Degraded, _) => self.compose_estimated(),
            (_, EpochKind::ClientTransition) => self.compose_transition(),
            (_, EpochKind::FullLoad) => match self.host.navigation_timing() {
                Some(timing) if timing.is_populated() => self.compose_full_load(&timing),
                _ => self.compose_estimated(),
            },
        }
    }

    fn report(&mut self, snapshot: Option<MetricSnapshot>) {
        let Some(snapshot) = snapshot else {
            return;
        };
        let now = self.host.now();
        let decision = self
            .updates
            .evaluate(sanitize(snapshot), self.mutations.since_last_mutation(now));
        if let Some(data) = decision.broadcast {
            info!(
                epoch = %data.epoch_id,
                sequence = data.update_sequence,
                estimated = data.estimated,
                "metrics reported"
            );
            self.emit(OutboundMessage::PerformanceMetrics { data });
        }
        if let Some(state) = self.state.as_mut() {
            state.epoch.metrics_collected = true;
            state.phase = EpochPhase::Reported;
        }
        self.schedule_update(now + decision.next_interval);
    }

    fn schedule_update(&mut self, at: Duration) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if state.phase == EpochPhase::Degraded {
            return;
        }
        state.cancel_update();
        let token = self
            .timers
            .schedule_cancellable(at, Some(state.epoch.id), TimerAction::Update);
        state.next_update = Some((at, token));
    }

    /// Re-reports immediately if the next scheduled update is further away than the
    /// shortest interval.
    fn expedite_update(&mut self) {
        let now = self.host.now();
        let soonest = now + self.config.update.min_interval;
        let later = self
            .state
            .as_ref()
            .and_then(|s| s.next_update.as_ref())
            .is_some_and(|(at, _)| *at > soonest);
        if later {
            debug!("significant content change, update brought forward");
            self.schedule_update(soonest);
        }
    }

    fn on_visually_complete(&mut self, completion: VisualCompletion) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        state.epoch.visually_complete = true;
        state.epoch.visual_completion_time = Some(completion.elapsed);
        if state.epoch.metrics_collected {
            // Budget already spent: the completion goes out as a follow-up.
            let snapshot = self.compose_transition();
            self.report(snapshot);
        } else {
            state.phase = EpochPhase::VisuallyComplete;
            self.collect();
        }
    }

    pub fn on_layout_shift(&mut self, shift: Fenced<LayoutShiftEntry>) {
        if self.layout_shift.record(&shift) {
            trace!(cls = self.layout_shift.value(), "layout shift");
        }
    }

    pub fn on_paint_candidate(&mut self, candidate: Fenced<PaintCandidateEntry>) {
        self.largest_paint.record(&self.host, &candidate);
    }

    /// A host observer threw while delivering entries for `epoch`.
    pub fn on_observer_error(&mut self, kind: ObserverKind, epoch: EpochId, message: impl Into<String>) {
        let err = ObservationError::Failed {
            kind: kind.as_str(),
            message: message.into(),
        };
        self.handle_observer_failure(kind, epoch, err);
    }

    fn handle_observer_failure(&mut self, kind: ObserverKind, epoch: EpochId, err: ObservationError) {
        let outcome = match kind {
            ObserverKind::LayoutShift => self.layout_shift.on_failure(&mut self.host, epoch),
            ObserverKind::LargestPaint => self.largest_paint.on_failure(&mut self.host, epoch),
        };
        match outcome {
            None => trace!(observer = kind.as_str(), %epoch, "stale observer failure ignored"),
            Some(FailureOutcome::Reconnect { delay }) => {
                warn!(observer = kind.as_str(), %epoch, error = %err, "observer failed, reconnecting");
                let at = self.host.now() + delay;
                let token = self
                    .timers
                    .schedule_cancellable(at, Some(epoch), TimerAction::Reconnect(kind));
                match kind {
                    ObserverKind::LayoutShift => self.layout_shift.arm_reconnect(token),
                    ObserverKind::LargestPaint => self.largest_paint.arm_reconnect(token),
                }
            }
            Some(FailureOutcome::GiveUp) => {
                let url = self.host.current_url();
                self.emit_error(&VitalsError::from(err), &url);
            }
        }
    }

    fn reconnect(&mut self, kind: ObserverKind) {
        let Some(epoch) = self.current_id() else {
            return;
        };
        let result = match kind {
            ObserverKind::LayoutShift => self.layout_shift.reconnect(&mut self.host),
            ObserverKind::LargestPaint => self.largest_paint.reconnect(&mut self.host),
        };
        match result {
            Ok(()) => {}
            Err(ObservationError::Unsupported(_)) => match kind {
                ObserverKind::LayoutShift => self.layout_shift.mark_unsupported(),
                ObserverKind::LargestPaint => self.largest_paint.mark_unsupported(),
            },
            Err(err) => self.handle_observer_failure(kind, epoch, err),
        }
    }

    pub fn on_mutations(&mut self, records: &[MutationRecord]) {
        let Some(id) = self.current_id().filter(|_| self.is_live()) else {
            return;
        };
        let burst = self.mutations.record(records, self.host.now());
        if let Some(closes) = burst.scoring_window_closes_at {
            self.timers
                .schedule(closes, Some(id), TimerAction::ScoringWindow);
        }
    }

    pub fn on_animation_frame(&mut self, frame: FrameSample) {
        if !self.stability.is_sampling() {
            return;
        }
        let last_mutation = self.mutations.last_mutation_time();
        if let Some(completion) = self.stability.sample(frame, last_mutation) {
            self.on_visually_complete(completion);
        }
    }

    pub fn on_history_call(&mut self, call: HistoryCall) {
        if self.is_live() {
            let outcome = self.navigation.history_call(call, self.host.now());
            self.arm_settle(outcome);
        }
    }

    pub fn on_popstate(&mut self) {
        if self.is_live() {
            let outcome = self.navigation.popstate(self.host.now());
            self.arm_settle(outcome);
        }
    }

    pub fn on_navigate_event(&mut self, kind: NavigateType) {
        if self.is_live() {
            let outcome = self.navigation.navigate_event(kind, self.host.now());
            self.arm_settle(outcome);
        }
    }

    fn arm_settle(&mut self, outcome: CandidateOutcome) {
        if let CandidateOutcome::Scheduled(at) = outcome {
            self.timers.schedule(at, None, TimerAction::NavigationSettle);
        }
    }

    pub fn on_command(&mut self, command: InboundCommand) {
        match command {
            InboundCommand::ForceRefresh => {
                info!("refresh requested");
                let collected = self
                    .state
                    .as_ref()
                    .is_some_and(|s| s.epoch.metrics_collected);
                if collected {
                    self.updates.force_next();
                    let snapshot = self.compose_current();
                    self.report(snapshot);
                } else {
                    self.collect();
                }
            }
            InboundCommand::ToggleClsDebugger { enabled } => {
                self.cls_debugger = enabled;
                debug!(enabled, "cls debugger toggled");
                self.emit_cls_debugger_state();
            }
            InboundCommand::GetClsDebuggerState => self.emit_cls_debugger_state(),
        }
    }

    fn emit_cls_debugger_state(&mut self) {
        let sources = if self.cls_debugger {
            self.layout_shift.sources().to_vec()
        } else {
            Vec::new()
        };
        self.emit(OutboundMessage::ClsDebuggerState {
            enabled: self.cls_debugger,
            sources,
        });
    }

    /// Fires every timer due at the host's current time. Returns how many ran.
    pub fn advance(&mut self) -> usize {
        let now = self.host.now();
        let mut fired = 0;
        while let Some(timer) = self.timers.pop_due(now) {
            if let Some(epoch) = timer.epoch {
                if self.current_id() != Some(epoch) {
                    trace!(%epoch, action = ?timer.action, "stale timer discarded");
                    continue;
                }
            }
            fired += 1;
            self.fire(timer.action, timer.deadline);
        }
        fired
    }

    fn fire(&mut self, action: TimerAction, deadline: Duration) {
        let now = self.host.now();
        match action {
            TimerAction::NavigationPoll => {
                let url = self.host.current_url();
                let outcome = self.navigation.poll(&url, now);
                self.arm_settle(outcome);
                let next = now + self.navigation.poll_interval();
                self.timers.schedule(next, None, TimerAction::NavigationPoll);
            }
            TimerAction::NavigationSettle => {
                let url = self.host.current_url();
                match self.navigation.settle(&url, now) {
                    SettleOutcome::Accepted(nav) => {
                        info!(source = ?nav.source, from = %nav.previous_url, to = %nav.url, "navigation detected");
                        self.begin_epoch(EpochKind::ClientTransition, nav.url);
                    }
                    SettleOutcome::Deferred(at) => {
                        self.timers.schedule(at, None, TimerAction::NavigationSettle);
                    }
                    SettleOutcome::Unchanged | SettleOutcome::Idle => {}
                }
            }
            TimerAction::Collect => self.collect(),
            TimerAction::StabilityCeiling => {
                if let Some(completion) = self.stability.force_timeout(deadline) {
                    self.on_visually_complete(completion);
                }
            }
            TimerAction::ScoringWindow => {
                if self.mutations.close_scoring_window() {
                    self.expedite_update();
                }
            }
            TimerAction::Reconnect(kind) => self.reconnect(kind),
            TimerAction::Update => {
                if let Some(state) = self.state.as_mut() {
                    state.next_update = None;
                }
                let snapshot = self.compose_current();
                self.report(snapshot);
            }
        }
    }

    /// Disconnects observers and drops every timer.
    pub fn detach(&mut self) {
        self.layout_shift.stop(&mut self.host);
        self.largest_paint.stop(&mut self.host);
        self.stability.stop();
        if let Some(state) = self.state.as_mut() {
            state.cancel_update();
        }
        self.timers.clear();
        info!("detached");
    }
}
