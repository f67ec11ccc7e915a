use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{ErrorCategory, VitalsError};
use crate::message::OutboundMessage;

/// The channel to the privileged coordinator.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Delivers one message and returns the coordinator's reply
    /// (`Value::Null` when there is none).
    async fn send(&self, message: &OutboundMessage) -> Result<serde_json::Value, VitalsError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, message: &OutboundMessage) -> Result<serde_json::Value, VitalsError> {
        (**self).send(message).await
    }
}

/// What to do after a failed send
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Try again after the given delay
    RetryAfter(Duration),
    /// Stop and surface the failure
    GiveUp,
}

/// Exponential backoff bounded by a retry count.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay,
            max_delay: config.max_delay,
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn decide(&self, attempt: u32, error: &VitalsError) -> RetryDecision {
        if attempt >= self.max_retries || !error.recoverable {
            return RetryDecision::GiveUp;
        }
        match error.retry_after_ms {
            Some(ms) => RetryDecision::RetryAfter(Duration::from_millis(ms).max(self.delay(attempt))),
            None => RetryDecision::RetryAfter(self.delay(attempt)),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Page-side end of the coordinator channel.
pub struct MessagingClient<T: Transport> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: Transport> MessagingClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends a message, retrying metrics traffic with backoff.
    pub async fn send(&self, message: &OutboundMessage) -> Result<serde_json::Value, VitalsError> {
        if !message.requires_delivery() {
            return self.transport.send(message).await;
        }

        let mut attempt = 0;
        loop {
            match self.transport.send(message).await {
                Ok(reply) => {
                    if attempt > 0 {
                        debug!(kind = message.kind(), attempt, "delivered after retry");
                    }
                    return Ok(reply);
                }
                Err(err) => match self.policy.decide(attempt, &err) {
                    RetryDecision::RetryAfter(delay) => {
                        warn!(
                            kind = message.kind(),
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "send failed, retrying"
                        );
                        sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::GiveUp => {
                        return Err(VitalsError::transport_failure(format!(
                            "Failed to deliver {} after {} attempts: {}",
                            message.kind(),
                            attempt + 1,
                            err.message
                        ))
                        .with_context(serde_json::json!({ "kind": message.kind() })));
                    }
                },
            }
        }
    }

    /// Sends and, if a metrics message is finally undeliverable, tries once
    /// to report the transport failure itself.
    pub async fn send_or_report(&self, message: &OutboundMessage, url: &str, timestamp: u64) {
        let Err(err) = self.send(message).await else {
            return;
        };
        warn!(kind = message.kind(), error = %err, "message dropped");
        if matches!(message, OutboundMessage::MetricsError { .. }) {
            return;
        }
        let report = OutboundMessage::metrics_error(&err, url, timestamp);
        if let Err(err) = self.transport.send(&report).await {
            warn!(error = %err, "could not report transport failure");
        }
    }

    pub async fn current_tab_id(&self) -> Result<u64, VitalsError> {
        let reply = self.send(&OutboundMessage::GetCurrentTabId).await?;
        reply
            .get("tabId")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| {
                VitalsError::new(ErrorCategory::TransportFailure, "Coordinator reply has no tabId")
                    .with_context(reply.clone())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct FlakyTransport {
        failures_left: Mutex<u32>,
        sent: Mutex<Vec<String>>,
    }

    impl FlakyTransport {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: Mutex::new(failures),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn send(&self, message: &OutboundMessage) -> Result<serde_json::Value, VitalsError> {
            self.sent.lock().unwrap().push(message.kind().to_string());
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(VitalsError::transport_failure("port closed"));
            }
            Ok(json!({ "tabId": 7 }))
        }
    }

    fn loading() -> OutboundMessage {
        OutboundMessage::MetricsLoading { url: "https://a.test/".into(), timestamp: 1 }
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(10), Duration::from_millis(2000));
    }

    #[test]
    fn unrecoverable_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let err = VitalsError::page_unsupported("about:blank");
        assert_eq!(policy.decide(0, &err), RetryDecision::GiveUp);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_three_times_then_succeeds() {
        let client = MessagingClient::new(FlakyTransport::new(3), RetryPolicy::default());
        client.send(&loading()).await.unwrap();
        assert_eq!(client.transport().sent.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn fourth_failure_surfaces_transport_error() {
        let client = MessagingClient::new(FlakyTransport::new(4), RetryPolicy::default());
        let err = client.send(&loading()).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::TransportFailure);
        assert_eq!(client.transport().sent.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn undeliverable_metrics_are_reported_as_errors() {
        let client = MessagingClient::new(FlakyTransport::new(4), RetryPolicy::default());
        client.send_or_report(&loading(), "https://a.test/", 5).await;
        let sent = client.transport().sent.lock().unwrap().clone();
        assert_eq!(sent.last().map(String::as_str), Some("metricsError"));
    }

    #[tokio::test]
    async fn tab_id_is_read_from_reply() {
        let client = MessagingClient::new(FlakyTransport::new(0), RetryPolicy::default());
        assert_eq!(client.current_tab_id().await.unwrap(), 7);
    }
}
