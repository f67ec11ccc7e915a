use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error categories for programmatic handling and distinct status messages
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The host lacks an instrumentation API. Permanent for the page.
    CapabilityUnsupported,
    /// An observation subsystem threw; retried once per epoch.
    ObservationTransientFailure,
    /// Messaging to the coordinator failed.
    TransportFailure,
    /// A computed metric value was NaN, negative or out of range.
    ValidationFailure,
    /// The page type forbids instrumentation.
    PageUnsupported,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::CapabilityUnsupported => "CapabilityUnsupported",
            ErrorCategory::ObservationTransientFailure => "ObservationTransientFailure",
            ErrorCategory::TransportFailure => "TransportFailure",
            ErrorCategory::ValidationFailure => "ValidationFailure",
            ErrorCategory::PageUnsupported => "PageUnsupported",
        }
    }
}

/// Structured error with context for debugging and recovery
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("[{category:?}] {message}")]
pub struct VitalsError {
    pub category: ErrorCategory,
    pub message: String,
    /// Optional context (url, metric, observer kind, ...)
    pub context: serde_json::Value,
    /// Whether retrying could help
    pub recoverable: bool,
    /// Suggested retry delay in milliseconds
    pub retry_after_ms: Option<u64>,
}

impl VitalsError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            context: serde_json::json!({}),
            recoverable: false,
            retry_after_ms: None,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn recoverable(mut self) -> Self {
        self.recoverable = true;
        self
    }

    pub fn with_retry_delay(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self.recoverable = true;
        self
    }

    pub fn capability_unsupported(capability: impl Into<String>) -> Self {
        let capability = capability.into();
        Self::new(
            ErrorCategory::CapabilityUnsupported,
            format!("Host does not support {} observation", capability),
        )
        .with_context(serde_json::json!({ "capability": capability }))
    }

    pub fn observation_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::ObservationTransientFailure, message).with_retry_delay(2000)
    }

    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransportFailure, message).recoverable()
    }

    pub fn validation_failure(field: &str, value: f64) -> Self {
        Self::new(
            ErrorCategory::ValidationFailure,
            format!("Dropped invalid {} value: {}", field, value),
        )
        .with_context(serde_json::json!({ "field": field, "value": value.to_string() }))
    }

    pub fn page_unsupported(url: impl Into<String>) -> Self {
        let url = url.into();
        Self::new(
            ErrorCategory::PageUnsupported,
            format!("Performance metrics are not available on this page: {}", url),
        )
        .with_context(serde_json::json!({ "url": url }))
    }
}

/// Failures raised by a host observation subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObservationError {
    #[error("{0} observation is not supported by this host")]
    Unsupported(&'static str),
    #[error("{kind} observer failed: {message}")]
    Failed { kind: &'static str, message: String },
}

impl From<ObservationError> for VitalsError {
    fn from(err: ObservationError) -> Self {
        match err {
            ObservationError::Unsupported(kind) => VitalsError::capability_unsupported(kind),
            ObservationError::Failed { kind, message } => {
                VitalsError::observation_failure(format!("{} observer failed: {}", kind, message))
                    .with_context(serde_json::json!({ "observer": kind }))
            }
        }
    }
}
