use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Converts a host duration into the millisecond float the page reports in.
pub fn as_millis_f64(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Largest page time taken at face value, about a century. Leaves room for
/// the engine to add intervals without overflowing.
pub const MAX_HOST_MILLIS: f64 = 3_155_760_000_000.0;

/// Inverse of [`as_millis_f64`]; negative and non-finite inputs clamp to zero,
/// absurdly large ones to [`MAX_HOST_MILLIS`].
pub fn from_millis_f64(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::try_from_secs_f64(ms.min(MAX_HOST_MILLIS) / 1000.0).unwrap_or_default()
    } else {
        Duration::ZERO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpochId(u64);

impl EpochId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EpochKind {
    FullLoad,
    ClientTransition,
}

/// Lifecycle phase of the current epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EpochPhase {
    Idle,
    Initializing,
    Observing,
    VisuallyComplete,
    Reported,
    /// Terminal: the host has no usable instrumentation.
    Degraded,
}

/// One navigation lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Epoch {
    pub id: EpochId,
    pub kind: EpochKind,
    #[serde(with = "crate::duration_ms")]
    pub start: Duration,
    pub url: String,
    pub metrics_collected: bool,
    pub visually_complete: bool,
    #[serde(with = "crate::duration_ms::option")]
    pub visual_completion_time: Option<Duration>,
}

impl Epoch {
    pub fn new(id: EpochId, kind: EpochKind, start: Duration, url: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            start,
            url: url.into(),
            metrics_collected: false,
            visually_complete: false,
            visual_completion_time: None,
        }
    }

    /// Start of the epoch on the host's millisecond timeline.
    pub fn start_ms(&self) -> f64 {
        as_millis_f64(self.start)
    }

    pub fn elapsed(&self, now: Duration) -> Duration {
        now.saturating_sub(self.start)
    }
}

/// Largest-contentful-paint value with whatever attribution could be found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LcpMetric {
    pub value: f64,
    pub element: Option<String>,
    pub selector: Option<String>,
    /// Attribution came from a heuristic scan rather than the host entry.
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    pub epoch_id: EpochId,
    pub url: String,
    pub ttfb: Option<f64>,
    pub fcp: Option<f64>,
    pub lcp: Option<LcpMetric>,
    pub cls: Option<f64>,
    pub dom_load_time: Option<f64>,
    pub navigation_duration: Option<f64>,
    pub visual_completion_time: Option<f64>,
    /// Visual completion was forced by the hard ceiling.
    pub visual_completion_timeout: bool,
    pub transition_kind: EpochKind,
    pub timestamp: u64,
    pub update_sequence: u64,
    pub estimated: bool,
}

impl MetricSnapshot {
    pub fn empty(epoch: &Epoch, timestamp: u64) -> Self {
        Self {
            epoch_id: epoch.id,
            url: epoch.url.clone(),
            ttfb: None,
            fcp: None,
            lcp: None,
            cls: None,
            dom_load_time: None,
            navigation_duration: None,
            visual_completion_time: None,
            visual_completion_timeout: false,
            transition_kind: epoch.kind,
            timestamp,
            update_sequence: 0,
            estimated: false,
        }
    }

    pub fn lcp_value(&self) -> Option<f64> {
        self.lcp.as_ref().map(|l| l.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSample {
    /// Host monotonic time of the frame.
    #[serde(with = "crate::duration_ms")]
    pub time: Duration,
    pub content_byte_length: u64,
    pub element_count: u32,
    pub scroll_height: f64,
    pub image_count: u32,
    pub script_count: u32,
    /// Wall clock, milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl FrameSample {
    pub fn resource_count(&self) -> u32 {
        self.image_count + self.script_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LcpElementType {
    Image,
    Video,
    BackgroundImage,
    TextBlock,
}

/// Produced by a fallback scan when the host entry has no element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LcpCandidate {
    pub element_type: LcpElementType,
    pub selector: String,
    pub size: f64,
    pub above_fold: bool,
}

/// Navigation timing entry, milliseconds relative to the time origin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NavigationTiming {
    pub activation_start: f64,
    pub fetch_start: f64,
    pub request_start: f64,
    pub response_start: f64,
    pub dom_content_loaded_event_end: f64,
    pub load_event_end: f64,
    pub duration: f64,
}

impl NavigationTiming {
    /// The host fills the entry progressively; zeroes mean "not yet".
    pub fn is_populated(&self) -> bool {
        self.response_start > 0.0 && self.load_event_end > 0.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    pub selector: String,
    pub previous_rect: Rect,
    pub current_rect: Rect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutShiftEntry {
    pub value: f64,
    pub had_recent_input: bool,
    pub start_time: f64,
    #[serde(default)]
    pub sources: Vec<SourceDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescriptor {
    pub tag: String,
    pub selector: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaintCandidateEntry {
    pub start_time: f64,
    pub size: f64,
    #[serde(default)]
    pub element: Option<ElementDescriptor>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedNode {
    pub tag: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub text_length: u32,
    #[serde(default)]
    pub area: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MutationRecord {
    ChildList { added: Vec<AddedNode> },
    Attributes { name: String },
    CharacterData,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CapabilityMatrix {
    pub layout_shift: bool,
    pub largest_paint: bool,
    pub paint: bool,
    pub navigation_timing: bool,
    pub navigation_api: bool,
}

impl CapabilityMatrix {
    pub fn full() -> Self {
        Self {
            layout_shift: true,
            largest_paint: true,
            paint: true,
            navigation_timing: true,
            navigation_api: true,
        }
    }

    /// No instrumentation at all: nothing can be measured for real.
    pub fn is_degraded(&self) -> bool {
        !self.layout_shift && !self.largest_paint && !self.paint && !self.navigation_timing
    }

    pub fn missing(&self) -> Vec<&'static str> {
        let mut gaps = Vec::new();
        if !self.layout_shift {
            gaps.push("layout-shift");
        }
        if !self.largest_paint {
            gaps.push("largest-contentful-paint");
        }
        if !self.paint {
            gaps.push("paint");
        }
        if !self.navigation_timing {
            gaps.push("navigation");
        }
        gaps
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NavigationSource {
    HistoryPush,
    HistoryReplace,
    PopState,
    NavigateEvent,
    Polling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NavigateType {
    Push,
    Replace,
    Traverse,
    Reload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HistoryCall {
    PushState,
    ReplaceState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_conversions_clamp_garbage() {
        assert_eq!(from_millis_f64(-5.0), Duration::ZERO);
        assert_eq!(from_millis_f64(f64::NAN), Duration::ZERO);
        assert_eq!(from_millis_f64(250.0), Duration::from_millis(250));
        assert_eq!(as_millis_f64(Duration::from_millis(1500)), 1500.0);
    }

    #[test]
    fn huge_page_times_saturate_instead_of_panicking() {
        let ceiling = from_millis_f64(MAX_HOST_MILLIS);
        assert_eq!(from_millis_f64(1e300), ceiling);
        assert_eq!(from_millis_f64(f64::MAX), ceiling);
        assert!(ceiling.checked_add(Duration::from_secs(3600)).is_some());

        let frame: FrameSample = serde_json::from_str(
            r#"{"time":1e300,"contentByteLength":0,"elementCount":0,"scrollHeight":0,
                "imageCount":0,"scriptCount":0,"timestamp":0}"#,
        )
        .unwrap();
        assert_eq!(frame.time, ceiling);
    }

    #[test]
    fn timing_needs_response_and_load() {
        let mut timing = NavigationTiming {
            response_start: 120.0,
            ..Default::default()
        };
        assert!(!timing.is_populated());
        timing.load_event_end = 900.0;
        assert!(timing.is_populated());
    }

    #[test]
    fn degraded_only_when_everything_is_missing() {
        let mut caps = CapabilityMatrix::default();
        assert!(caps.is_degraded());
        caps.paint = true;
        assert!(!caps.is_degraded());
        assert_eq!(caps.missing(), vec!["layout-shift", "largest-contentful-paint", "navigation"]);
    }

    #[test]
    fn mutation_records_are_tagged() {
        let raw = r#"{"type":"childList","added":[{"tag":"IMG","area":1200.0}]}"#;
        let record: MutationRecord = serde_json::from_str(raw).unwrap();
        match record {
            MutationRecord::ChildList { added } => assert_eq!(added[0].tag, "IMG"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
