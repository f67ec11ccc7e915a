//! What the injected scripts hand back, and how it reaches the engine.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;
use vitalscope_core::{
    CapabilityMatrix, EpochId, FrameSample, HistoryCall, LayoutShiftEntry, LcpCandidate,
    MutationRecord, NavigateType, NavigationTiming, PaintCandidateEntry,
};
use vitalscope_engine::{Fenced, NavigationEpochController, ObserverKind, PageHost};

/// One synchronous snapshot of page state.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageProbe {
    /// `performance.now()` when the probe ran.
    pub now: f64,
    /// `performance.timeOrigin`; changes when a new document loads.
    #[serde(default)]
    pub time_origin: f64,
    pub wall_clock: f64,
    pub url: String,
    pub ready_state: String,
    #[serde(default)]
    pub capabilities: CapabilityMatrix,
    #[serde(default)]
    pub timing: Option<NavigationTiming>,
    #[serde(default)]
    pub fcp: Option<f64>,
    #[serde(default)]
    pub element_count: usize,
    #[serde(default)]
    pub candidates: Vec<LcpCandidate>,
}

impl PageProbe {
    pub fn same_document(&self, other: &PageProbe) -> bool {
        (self.time_origin - other.time_origin).abs() < 1.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PageObserver {
    LayoutShift,
    LargestPaint,
}

impl From<PageObserver> for ObserverKind {
    fn from(value: PageObserver) -> Self {
        match value {
            PageObserver::LayoutShift => ObserverKind::LayoutShift,
            PageObserver::LargestPaint => ObserverKind::LargestPaint,
        }
    }
}

/// The name the injected script uses for an observer.
pub fn page_name(kind: ObserverKind) -> &'static str {
    match kind {
        ObserverKind::LayoutShift => "layoutShift",
        ObserverKind::LargestPaint => "largestPaint",
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PageEvent {
    LayoutShift {
        epoch: EpochId,
        entry: LayoutShiftEntry,
    },
    PaintCandidate {
        epoch: EpochId,
        entry: PaintCandidateEntry,
    },
    ObserverError {
        kind: PageObserver,
        epoch: EpochId,
        message: String,
    },
    Mutations {
        records: Vec<MutationRecord>,
    },
    Frame(FrameSample),
    History {
        call: HistoryCall,
    },
    PopState,
    Navigate {
        #[serde(rename = "navigationType")]
        navigation_type: NavigateType,
    },
    Load,
}

/// Raw drain result. Events stay undecoded so one bad entry cannot spoil
/// the rest.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PageBatch {
    pub installed: bool,
    #[serde(default)]
    pub events: Vec<Value>,
}

impl PageBatch {
    /// Decodes each event on its own, skipping malformed ones. Returns the
    /// decoded events and how many were dropped.
    pub fn decode(self) -> (Vec<PageEvent>, usize) {
        let mut dropped = 0;
        let events = self
            .events
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<PageEvent>(raw) {
                Ok(event) => Some(event),
                Err(err) => {
                    warn!(error = %err, "malformed page event skipped");
                    dropped += 1;
                    None
                }
            })
            .collect();
        (events, dropped)
    }
}

/// Feeds one page event to the controller.
pub fn dispatch<H: PageHost>(controller: &mut NavigationEpochController<H>, event: PageEvent) {
    match event {
        PageEvent::LayoutShift { epoch, entry } => controller.on_layout_shift(Fenced::new(epoch, entry)),
        PageEvent::PaintCandidate { epoch, entry } => {
            controller.on_paint_candidate(Fenced::new(epoch, entry))
        }
        PageEvent::ObserverError { kind, epoch, message } => {
            controller.on_observer_error(kind.into(), epoch, message)
        }
        PageEvent::Mutations { records } => controller.on_mutations(&records),
        PageEvent::Frame(sample) => controller.on_animation_frame(sample),
        PageEvent::History { call } => controller.on_history_call(call),
        PageEvent::PopState => controller.on_popstate(),
        PageEvent::Navigate { navigation_type } => controller.on_navigate_event(navigation_type),
        PageEvent::Load => controller.on_load(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn decodes_a_mixed_batch() {
        let raw = json!({
            "installed": true,
            "events": [
                { "type": "history", "call": "pushState" },
                { "type": "popState" },
                { "type": "navigate", "navigationType": "reload" },
                { "type": "layoutShift", "epoch": 2, "entry": {
                    "value": 0.04, "hadRecentInput": false, "startTime": 812.5,
                    "sources": [{ "selector": "div#banner",
                        "previousRect": { "x": 0, "y": 0, "width": 300, "height": 50 },
                        "currentRect": { "x": 0, "y": 80, "width": 300, "height": 50 } }]
                }},
                { "type": "paintCandidate", "epoch": 2, "entry": {
                    "startTime": 950.0, "size": 48000, "element": null, "url": "https://cdn.test/hero.jpg"
                }},
                { "type": "observerError", "kind": "largestPaint", "epoch": 2, "message": "TypeError" },
                { "type": "mutations", "records": [
                    { "type": "childList", "added": [{ "tag": "img", "id": "", "className": "ad-slot", "textLength": 0, "area": 90000 }] },
                    { "type": "attributes", "name": "class" },
                    { "type": "characterData" }
                ]},
                { "type": "frame", "time": 1016, "contentByteLength": 5120, "elementCount": 140,
                  "scrollHeight": 2400, "imageCount": 6, "scriptCount": 3, "timestamp": 1700000001016u64 },
                { "type": "load" }
            ]
        });
        let batch: PageBatch = serde_json::from_value(raw).unwrap();
        assert!(batch.installed);
        let (events, dropped) = batch.decode();
        assert_eq!(dropped, 0);
        assert_eq!(events.len(), 9);
        assert_eq!(events[0], PageEvent::History { call: HistoryCall::PushState });
        assert_eq!(
            events[2],
            PageEvent::Navigate { navigation_type: NavigateType::Reload }
        );
        match &events[3] {
            PageEvent::LayoutShift { epoch, entry } => {
                assert_eq!(*epoch, EpochId::new(2));
                assert_eq!(entry.sources[0].current_rect.y, 80.0);
            }
            other => panic!("unexpected {:?}", other),
        }
        match &events[6] {
            PageEvent::Mutations { records } => assert_eq!(records.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
        match &events[7] {
            PageEvent::Frame(sample) => {
                assert_eq!(sample.time, Duration::from_millis(1016));
                assert_eq!(sample.resource_count(), 9);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(events[8], PageEvent::Load);
    }

    #[test]
    fn malformed_events_are_skipped_individually() {
        let raw = json!({
            "installed": true,
            "events": [
                { "type": "frame", "time": "x" },
                { "type": "popState" },
                { "type": "teleport" },
                { "type": "history", "call": "replaceState" }
            ]
        });
        let batch: PageBatch = serde_json::from_value(raw).unwrap();
        let (events, dropped) = batch.decode();
        assert_eq!(dropped, 2);
        assert_eq!(
            events,
            vec![
                PageEvent::PopState,
                PageEvent::History { call: HistoryCall::ReplaceState },
            ]
        );
    }

    #[test]
    fn probe_without_timing_decodes() {
        let raw = json!({
            "now": 12.5, "timeOrigin": 1700000000000.25, "wallClock": 1700000000012u64,
            "url": "https://a.test/", "readyState": "loading",
            "capabilities": { "layoutShift": true, "largestPaint": true, "paint": true,
                              "navigationTiming": true, "navigationApi": false },
            "timing": null, "fcp": null, "elementCount": 3,
            "candidates": [{ "elementType": "text-block", "selector": "h1", "size": 2000, "aboveFold": true }]
        });
        let probe: PageProbe = serde_json::from_value(raw).unwrap();
        assert_eq!(probe.timing, None);
        assert!(!probe.capabilities.navigation_api);
        assert_eq!(probe.candidates.len(), 1);

        let reloaded = PageProbe { time_origin: probe.time_origin + 4000.0, ..probe.clone() };
        assert!(probe.same_document(&probe));
        assert!(!probe.same_document(&reloaded));
    }

    #[test]
    fn uninstalled_page_yields_nothing() {
        let batch: PageBatch = serde_json::from_value(json!({ "installed": false, "events": [] })).unwrap();
        assert_eq!(batch, PageBatch::default());
    }

    #[test]
    fn observer_names_match_the_script() {
        assert_eq!(ObserverKind::from(PageObserver::LargestPaint), ObserverKind::LargestPaint);
        assert_eq!(page_name(ObserverKind::LayoutShift), "layoutShift");
    }
}
