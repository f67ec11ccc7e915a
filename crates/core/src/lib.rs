pub mod config;
pub mod duration_ms;
pub mod error;
pub mod message;
pub mod messaging;
pub mod model;

pub use config::EngineConfig;
pub use error::{ErrorCategory, ObservationError, VitalsError};
pub use message::{InboundCommand, OutboundMessage};
pub use messaging::{MessagingClient, RetryDecision, RetryPolicy, Transport};
pub use model::{
    AddedNode, CapabilityMatrix, ElementDescriptor, Epoch, EpochId, EpochKind, EpochPhase,
    FrameSample, HistoryCall, LayoutShiftEntry, LcpCandidate, LcpElementType, LcpMetric,
    MetricSnapshot, MutationRecord, NavigateType, NavigationSource, NavigationTiming,
    PaintCandidateEntry, Rect, SourceDescriptor,
};
