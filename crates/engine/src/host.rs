use std::time::Duration;

use vitalscope_core::{
    CapabilityMatrix, EpochId, LcpCandidate, NavigationTiming, ObservationError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObserverKind {
    LayoutShift,
    LargestPaint,
}

impl ObserverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObserverKind::LayoutShift => "layout-shift",
            ObserverKind::LargestPaint => "largest-contentful-paint",
        }
    }
}

/// An observation tagged with the epoch that armed its observer.
#[derive(Debug, Clone, PartialEq)]
pub struct Fenced<T> {
    pub epoch: EpochId,
    pub entry: T,
}

impl<T> Fenced<T> {
    pub fn new(epoch: EpochId, entry: T) -> Self {
        Self { epoch, entry }
    }
}

/// The page the engine instruments.
///
/// Queries are synchronous: a host backed by a remote page answers them from
/// its most recent probe.
pub trait PageHost {
    /// Monotonic time since the page's time origin.
    fn now(&self) -> Duration;
    /// Milliseconds since the Unix epoch.
    fn wall_clock_ms(&self) -> u64;
    fn current_url(&self) -> String;
    fn capabilities(&self) -> CapabilityMatrix;
    fn document_complete(&self) -> bool;
    /// `None` until the host has a navigation entry.
    fn navigation_timing(&self) -> Option<NavigationTiming>;
    fn first_contentful_paint(&self) -> Option<f64>;
    fn dom_element_count(&self) -> usize;
    /// Current above-the-fold images and text blocks with their rendered size.
    fn scan_paint_candidates(&self) -> Vec<LcpCandidate>;
    /// (Re)subscribes an observer; entries it delivers carry `epoch`.
    /// Fails with [`ObservationError::Unsupported`] when the page lacks the API.
    fn observe(&mut self, kind: ObserverKind, epoch: EpochId) -> Result<(), ObservationError>;
    fn disconnect(&mut self, kind: ObserverKind);
}

const RESTRICTED_SCHEMES: &[&str] = &[
    "chrome:",
    "chrome-extension:",
    "chrome-search:",
    "edge:",
    "about:",
    "moz-extension:",
    "view-source:",
    "devtools:",
    "data:",
];

/// Pages whose scheme forbids instrumentation.
pub fn is_restricted_url(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    lower.is_empty() || RESTRICTED_SCHEMES.iter().any(|scheme| lower.starts_with(scheme))
}
