use serde::{Deserialize, Serialize};

use crate::error::VitalsError;
use crate::model::{MetricSnapshot, SourceDescriptor};

/// Messages from the page to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    MetricsLoading {
        url: String,
        timestamp: u64,
    },
    PerformanceMetrics {
        data: MetricSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    MetricsError {
        error_type: String,
        error_message: String,
        timestamp: u64,
        url: String,
    },
    // The recommendation kinds belong to the page analyzers; they only share the channel.
    RecommendationsLoading {
        url: String,
    },
    RecommendationsGenerated {
        data: serde_json::Value,
    },
    RecommendationsError {
        message: String,
    },
    GetCurrentTabId,
    #[serde(rename = "clsDebuggerState")]
    ClsDebuggerState {
        enabled: bool,
        sources: Vec<SourceDescriptor>,
    },
}

impl OutboundMessage {
    pub fn metrics_error(error: &VitalsError, url: impl Into<String>, timestamp: u64) -> Self {
        OutboundMessage::MetricsError {
            error_type: error.category.as_str().to_string(),
            error_message: error.message.clone(),
            timestamp,
            url: url.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::MetricsLoading { .. } => "metricsLoading",
            OutboundMessage::PerformanceMetrics { .. } => "performanceMetrics",
            OutboundMessage::MetricsError { .. } => "metricsError",
            OutboundMessage::RecommendationsLoading { .. } => "recommendationsLoading",
            OutboundMessage::RecommendationsGenerated { .. } => "recommendationsGenerated",
            OutboundMessage::RecommendationsError { .. } => "recommendationsError",
            OutboundMessage::GetCurrentTabId => "getCurrentTabId",
            OutboundMessage::ClsDebuggerState { .. } => "clsDebuggerState",
        }
    }

    /// Metrics and error messages must survive transient transport failures.
    pub fn requires_delivery(&self) -> bool {
        matches!(
            self,
            OutboundMessage::MetricsLoading { .. }
                | OutboundMessage::PerformanceMetrics { .. }
                | OutboundMessage::MetricsError { .. }
        )
    }
}

/// Commands the coordinator or popup sends into the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundCommand {
    #[serde(rename = "forceRefresh")]
    ForceRefresh,
    #[serde(rename = "toggleCLSDebugger")]
    ToggleClsDebugger { enabled: bool },
    #[serde(rename = "getCLSDebuggerState")]
    GetClsDebuggerState,
}
