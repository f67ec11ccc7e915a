//! In-page measurement and navigation-epoch engine.
//!
//! The engine is a synchronous state machine. A [`PageHost`] answers queries
//! about the page; the embedding runtime feeds host events into the
//! [`NavigationEpochController`], calls [`NavigationEpochController::advance`]
//! when timers are due and forwards whatever lands in the outbox.

pub mod controller;
pub mod host;
pub mod largest_paint;
pub mod layout_shift;
pub mod mutation;
pub mod navigation;
pub mod observer;
pub mod stability;
pub mod validation;

#[cfg(test)]
mod testing;

pub use controller::{NavigationEpochController, TimerAction};
pub use host::{Fenced, ObserverKind, PageHost, is_restricted_url};
pub use largest_paint::{LargestPaintTracker, adaptive_wait_budget, fallback_metric, rank_candidates};
pub use layout_shift::LayoutShiftAccumulator;
pub use mutation::{BurstScore, ContentMutationScorer};
pub use navigation::{AcceptedNavigation, CandidateOutcome, NavigationChangeDetector, SettleOutcome};
pub use observer::{FailureOutcome, ObserverHandle, ObserverStatus};
pub use stability::{CompletionReason, StabilityRatios, VisualCompletion, VisualStabilityDetector};
