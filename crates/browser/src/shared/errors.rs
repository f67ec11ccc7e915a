use serde_json::json;
use vitalscope_core::VitalsError;

/// The page went away mid-call; the next document will answer.
pub fn is_context_lost(message: &str) -> bool {
    message.contains("Cannot find context") || message.contains("Execution context was destroyed")
}

pub fn to_vitals_error(e: impl std::fmt::Display, action: &str) -> VitalsError {
    let s = e.to_string();
    let err = if is_context_lost(&s) {
        VitalsError::observation_failure(format!("{} lost its page context: {}", action, s))
            .with_retry_delay(500)
    } else if s.contains("timeout") || s.contains("Timeout") {
        VitalsError::observation_failure(format!("{} timed out: {}", action, s))
    } else if s.contains("net::ERR") || s.contains("navigation") || s.contains("Navigation") {
        VitalsError::transport_failure(format!("{} navigation failed: {}", action, s))
    } else {
        VitalsError::observation_failure(format!("{} failed: {}", action, s))
    };
    err.with_context(json!({ "action": action }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitalscope_core::ErrorCategory;

    #[test]
    fn categorizes_by_message() {
        let lost = to_vitals_error("Execution context was destroyed.", "Drain");
        assert_eq!(lost.category, ErrorCategory::ObservationTransientFailure);
        assert_eq!(lost.retry_after_ms, Some(500));

        let nav = to_vitals_error("net::ERR_NAME_NOT_RESOLVED", "Goto");
        assert_eq!(nav.category, ErrorCategory::TransportFailure);
        assert_eq!(nav.context["action"], "Goto");

        let other = to_vitals_error("boom", "Probe");
        assert!(other.message.starts_with("Probe failed"));
    }
}
