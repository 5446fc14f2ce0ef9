//! Webhook dispatcher.
//!
//! Executes one attempt end to end: waits for bulkhead permits, signs the
//! stored payload, sends it through the [`WebhookTransport`], classifies the
//! outcome, writes the attempt row, bumps the endpoint counters and hands the
//! result to the [`RetryScheduler`].
//!
//! # Classification
//!
//! | Outcome | Status |
//! |---------|--------|
//! | 2xx | `succeeded` |
//! | 408, 429 | `failed_retryable` |
//! | other 4xx | `failed_permanent` |
//! | 5xx, other statuses | `failed_retryable` |
//! | timeout, connection error, transport panic | `failed_retryable` |
//!
//! A retryable outcome on the last allowed attempt becomes `exhausted`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use super::bulkhead::{BulkheadConfig, DeliveryBulkhead};
use super::retry::{FollowUp, RetryScheduler};
use super::signature;
use super::transport::{OutboundRequest, TransportError, WebhookTransport};
use crate::models::{AttemptStatus, DeliveryAttempt, WebhookEndpoint};
use crate::storage::{AttemptStore, EndpointStore};
use crate::{Error, Result};

/// Delivery settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Per-attempt request timeout in milliseconds (default: 10000).
    pub timeout_ms: u64,

    /// Concurrency limits.
    pub bulkhead: BulkheadConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            bulkhead: BulkheadConfig::default(),
        }
    }
}

impl DeliveryConfig {
    /// Per-attempt request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Why an attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryFailure {
    /// May succeed if tried again later.
    #[error("{0}")]
    Transient(String),
    /// The subscriber rejected the request; retrying will not help.
    #[error("{0}")]
    Permanent(String),
}

impl DeliveryFailure {
    /// Whether the failure is worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Observed result of one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    /// HTTP status, when a response arrived.
    pub status_code: Option<u16>,
    /// Time from send to response or failure.
    pub response_time_ms: Option<u64>,
    /// `None` on success.
    pub failure: Option<DeliveryFailure>,
}

impl SendOutcome {
    /// Outcome for an attempt that failed without a response.
    #[must_use]
    pub const fn failed(response_time_ms: Option<u64>, failure: DeliveryFailure) -> Self {
        Self {
            status_code: None,
            response_time_ms,
            failure: Some(failure),
        }
    }

    /// Whether the send succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Classifies an HTTP status. Returns `None` for success.
#[must_use]
pub fn classify_status(status: u16, body_excerpt: Option<&str>) -> Option<DeliveryFailure> {
    if (200..300).contains(&status) {
        return None;
    }

    let reason = reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason());
    let mut message = reason.map_or_else(
        || format!("HTTP {status}"),
        |reason| format!("HTTP {status} {reason}"),
    );
    if let Some(body) = body_excerpt {
        message.push_str(": ");
        message.push_str(body);
    }

    match status {
        408 | 429 => Some(DeliveryFailure::Transient(message)),
        400..=499 => Some(DeliveryFailure::Permanent(message)),
        _ => Some(DeliveryFailure::Transient(message)),
    }
}

/// Result of executing an attempt.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    /// The attempt as recorded.
    pub attempt: DeliveryAttempt,
    /// Retry scheduled as a consequence, if any.
    pub next_attempt: Option<DeliveryAttempt>,
    /// Whether the endpoint was auto-disabled by this outcome.
    pub endpoint_disabled: bool,
}

impl DispatchReport {
    /// Whether the attempt succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.attempt.status == AttemptStatus::Succeeded
    }

    /// Whether a retry was scheduled.
    #[must_use]
    pub const fn retry_scheduled(&self) -> bool {
        self.next_attempt.is_some()
    }
}

/// Sends attempts and records their outcomes.
pub struct Dispatcher {
    transport: Arc<dyn WebhookTransport>,
    bulkhead: DeliveryBulkhead,
    endpoints: Arc<dyn EndpointStore>,
    attempts: Arc<dyn AttemptStore>,
    scheduler: RetryScheduler,
    request_timeout: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        transport: Arc<dyn WebhookTransport>,
        endpoints: Arc<dyn EndpointStore>,
        attempts: Arc<dyn AttemptStore>,
        scheduler: RetryScheduler,
        config: &DeliveryConfig,
    ) -> Self {
        Self {
            transport,
            bulkhead: DeliveryBulkhead::new(config.bulkhead),
            endpoints,
            attempts,
            scheduler,
            request_timeout: config.timeout(),
        }
    }

    /// The retry scheduler outcomes are handed to.
    #[must_use]
    pub const fn scheduler(&self) -> &RetryScheduler {
        &self.scheduler
    }

    /// The bulkheads gating every send.
    #[must_use]
    pub const fn bulkhead(&self) -> &DeliveryBulkhead {
        &self.bulkhead
    }

    /// Per-attempt request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Executes an attempt that is stored as `sending`.
    ///
    /// Produces exactly one attempt record: the row passed in is updated in
    /// place with the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if another writer settled the attempt
    /// first, or a storage error.
    pub async fn execute(
        &self,
        endpoint: &WebhookEndpoint,
        mut attempt: DeliveryAttempt,
    ) -> Result<DispatchReport> {
        let permit = match self.bulkhead.acquire(&endpoint.id).await {
            Ok(permit) => permit,
            Err(e) => {
                let failure = DeliveryFailure::Transient(format!("Delivery queue full: {e}"));
                return self.finalize(Some(endpoint), attempt, SendOutcome::failed(None, failure));
            },
        };

        let signature = signature::sign(attempt.body(), endpoint.secret.expose_secret());
        attempt.signature = Some(signature.clone());
        attempt.sent_at = Some(Utc::now());
        if !self.attempts.transition(&attempt, AttemptStatus::Sending)? {
            return Err(lost_ownership(&attempt));
        }

        let request = OutboundRequest {
            url: endpoint.url.clone(),
            body: attempt.payload.clone().into_bytes(),
            signature,
            event_type: attempt.event_type.clone(),
            timeout: self.request_timeout,
        };

        let outcome = self.send(request).await;
        drop(permit);

        self.finalize(Some(endpoint), attempt, outcome)
    }

    /// Sends a payload once without recording anything.
    ///
    /// Used for connectivity tests. Still gated by the bulkheads.
    pub async fn probe(
        &self,
        endpoint: &WebhookEndpoint,
        body: Vec<u8>,
        event_type: &str,
    ) -> SendOutcome {
        let _permit = match self.bulkhead.acquire(&endpoint.id).await {
            Ok(permit) => permit,
            Err(e) => {
                return SendOutcome::failed(
                    None,
                    DeliveryFailure::Transient(format!("Delivery queue full: {e}")),
                );
            },
        };

        let signature = signature::sign(&body, endpoint.secret.expose_secret());
        let request = OutboundRequest {
            url: endpoint.url.clone(),
            body,
            signature,
            event_type: event_type.to_string(),
            timeout: self.request_timeout,
        };

        self.send(request).await
    }

    /// Records the outcome of an attempt that is stored as `sending`.
    ///
    /// Counters are applied only when the endpoint is known.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if another writer settled the attempt
    /// first, or a storage error.
    pub fn finalize(
        &self,
        endpoint: Option<&WebhookEndpoint>,
        mut attempt: DeliveryAttempt,
        outcome: SendOutcome,
    ) -> Result<DispatchReport> {
        let now = Utc::now();
        attempt.status = RetryScheduler::settle(&attempt, outcome.failure.as_ref());
        attempt.response_status_code = outcome.status_code;
        attempt.response_time_ms = outcome.response_time_ms;
        attempt.error_message = outcome.failure.as_ref().map(ToString::to_string);
        attempt.completed_at = Some(now);

        if !self.attempts.transition(&attempt, AttemptStatus::Sending)? {
            return Err(lost_ownership(&attempt));
        }
        record_attempt_metrics(&attempt);

        let streak = match endpoint {
            Some(ep) => self.endpoints.record_outcome(&ep.id, attempt.status, now)?,
            None => None,
        };
        let FollowUp {
            next_attempt,
            endpoint_disabled,
        } = self.scheduler.after_attempt(endpoint, &attempt, streak)?;

        Ok(DispatchReport {
            attempt,
            next_attempt,
            endpoint_disabled,
        })
    }

    /// Closes a claimed attempt without sending it.
    ///
    /// The attempt ends `failed_permanent` with `reason`; no counters are
    /// touched and nothing is scheduled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if another writer settled the attempt
    /// first, or a storage error.
    pub fn cancel(&self, mut attempt: DeliveryAttempt, reason: &str) -> Result<DispatchReport> {
        attempt.status = AttemptStatus::FailedPermanent;
        attempt.error_message = Some(reason.to_string());
        attempt.completed_at = Some(Utc::now());

        if !self.attempts.transition(&attempt, AttemptStatus::Sending)? {
            return Err(lost_ownership(&attempt));
        }

        metrics::counter!("webhook_attempts_cancelled_total").increment(1);
        tracing::info!(
            delivery_id = %attempt.delivery_id,
            endpoint_id = %attempt.endpoint_id,
            attempt_number = attempt.attempt_number,
            reason,
            "Cancelled webhook attempt"
        );

        Ok(DispatchReport {
            attempt,
            next_attempt: None,
            endpoint_disabled: false,
        })
    }

    /// Sends on a separate task so a panicking transport only fails this attempt.
    async fn send(&self, request: OutboundRequest) -> SendOutcome {
        let transport = Arc::clone(&self.transport);
        let timeout = request.timeout;
        let started = Instant::now();

        let mut handle = tokio::spawn(async move { transport.send(request).await });
        let joined = tokio::time::timeout(timeout, &mut handle).await;
        let elapsed = Some(elapsed_ms(started));

        match joined {
            Err(_) => {
                handle.abort();
                SendOutcome::failed(
                    elapsed,
                    DeliveryFailure::Transient(TransportError::Timeout(timeout).to_string()),
                )
            },
            Ok(Err(join_error)) => {
                let message = if join_error.is_panic() {
                    "Transport panicked while sending"
                } else {
                    "Transport task was cancelled"
                };
                tracing::error!(error = %join_error, "{message}");
                SendOutcome::failed(elapsed, DeliveryFailure::Transient(message.to_string()))
            },
            Ok(Ok(Err(e))) => {
                SendOutcome::failed(elapsed, DeliveryFailure::Transient(e.to_string()))
            },
            Ok(Ok(Ok(response))) => SendOutcome {
                status_code: Some(response.status),
                response_time_ms: elapsed,
                failure: classify_status(response.status, response.body_excerpt.as_deref()),
            },
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_attempt_metrics(attempt: &DeliveryAttempt) {
    metrics::counter!("webhook_attempts_total", "status" => attempt.status.as_str()).increment(1);
    if let Some(ms) = attempt.response_time_ms {
        metrics::histogram!("webhook_attempt_duration_ms").record(ms as f64);
    }

    match attempt.status {
        AttemptStatus::Succeeded => tracing::debug!(
            delivery_id = %attempt.delivery_id,
            endpoint_id = %attempt.endpoint_id,
            attempt_number = attempt.attempt_number,
            status_code = ?attempt.response_status_code,
            response_time_ms = ?attempt.response_time_ms,
            "Webhook delivered"
        ),
        status => tracing::warn!(
            delivery_id = %attempt.delivery_id,
            endpoint_id = %attempt.endpoint_id,
            attempt_number = attempt.attempt_number,
            status = %status,
            status_code = ?attempt.response_status_code,
            error = attempt.error_message.as_deref().unwrap_or(""),
            "Webhook attempt failed"
        ),
    }
}

fn lost_ownership(attempt: &DeliveryAttempt) -> Error {
    tracing::warn!(
        delivery_id = %attempt.delivery_id,
        attempt_number = attempt.attempt_number,
        "Attempt was settled by another worker"
    );
    Error::InvalidState(format!(
        "Attempt {} of delivery {} is no longer in flight",
        attempt.attempt_number, attempt.delivery_id
    ))
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EndpointId, EndpointRetry};
    use crate::storage::SqliteWebhookStore;
    use crate::webhooks::retry::RetryConfig;
    use crate::webhooks::transport::{MockReply, MockTransport};
    use secrecy::SecretString;
    use test_case::test_case;

    #[test_case(200, None ; "ok")]
    #[test_case(204, None ; "no content")]
    #[test_case(400, Some(false) ; "bad request")]
    #[test_case(401, Some(false) ; "unauthorized")]
    #[test_case(404, Some(false) ; "not found")]
    #[test_case(408, Some(true) ; "request timeout")]
    #[test_case(410, Some(false) ; "gone")]
    #[test_case(429, Some(true) ; "too many requests")]
    #[test_case(500, Some(true) ; "internal error")]
    #[test_case(503, Some(true) ; "unavailable")]
    #[test_case(302, Some(true) ; "redirect")]
    fn test_classify_status(status: u16, retryable: Option<bool>) {
        assert_eq!(
            classify_status(status, None).map(|f| f.is_retryable()),
            retryable
        );
    }

    #[test]
    fn test_classify_message_includes_reason_and_body() {
        let failure = classify_status(503, Some("maintenance")).unwrap();
        assert_eq!(failure.to_string(), "HTTP 503 Service Unavailable: maintenance");
    }

    struct Harness {
        store: Arc<SqliteWebhookStore>,
        transport: Arc<MockTransport>,
        dispatcher: Dispatcher,
        endpoint: WebhookEndpoint,
    }

    fn harness(replies: Vec<MockReply>, retry: RetryConfig, timeout_ms: u64) -> Harness {
        let store = Arc::new(SqliteWebhookStore::in_memory().unwrap());
        let transport = Arc::new(MockTransport::new(replies));
        let endpoints: Arc<dyn EndpointStore> = store.clone();
        let attempts: Arc<dyn AttemptStore> = store.clone();
        let scheduler = RetryScheduler::new(Arc::clone(&endpoints), Arc::clone(&attempts), &retry);
        let config = DeliveryConfig {
            timeout_ms,
            ..DeliveryConfig::default()
        };
        let dispatcher = Dispatcher::new(transport.clone(), endpoints, attempts, scheduler, &config);

        let now = Utc::now();
        let endpoint = WebhookEndpoint {
            id: EndpointId::new("ep-1"),
            url: "https://x.test/hook".to_string(),
            secret: SecretString::from("whsec_test".to_string()),
            events: vec![],
            description: None,
            metadata: serde_json::Value::Null,
            active: true,
            retry: EndpointRetry::default(),
            delivery_count: 0,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            last_delivery_at: None,
            created_at: now,
            updated_at: now,
            disabled_at: None,
        };
        store.insert_endpoint(&endpoint).unwrap();

        Harness {
            store,
            transport,
            dispatcher,
            endpoint,
        }
    }

    fn sending_attempt(h: &Harness, max_attempts: u32) -> DeliveryAttempt {
        let mut attempt = DeliveryAttempt::first(
            h.endpoint.id.clone(),
            "invoice.created",
            r#"{"type":"invoice.created","data":{},"timestamp":"2024-01-15T10:30:00Z"}"#.to_string(),
            max_attempts,
            Utc::now(),
        );
        attempt.status = AttemptStatus::Sending;
        h.store.upsert_attempt(&attempt).unwrap();
        attempt
    }

    #[tokio::test]
    async fn test_success_records_attempt_and_counters() {
        let h = harness(vec![MockReply::Status(200)], RetryConfig::default(), 1_000);
        let attempt = sending_attempt(&h, 3);

        let report = h.dispatcher.execute(&h.endpoint, attempt).await.unwrap();
        assert!(report.succeeded());
        assert!(!report.retry_scheduled());
        assert_eq!(report.attempt.response_status_code, Some(200));
        assert!(report.attempt.response_time_ms.is_some());

        let sent = h.transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(signature::verify(&sent[0].body, &sent[0].signature, "whsec_test"));

        let ep = h.store.get_endpoint(&h.endpoint.id).unwrap().unwrap();
        assert_eq!((ep.delivery_count, ep.success_count, ep.failure_count), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_server_error_schedules_retry() {
        let h = harness(vec![MockReply::Status(500)], RetryConfig::default(), 1_000);
        let attempt = sending_attempt(&h, 3);

        let report = h.dispatcher.execute(&h.endpoint, attempt).await.unwrap();
        assert_eq!(report.attempt.status, AttemptStatus::FailedRetryable);
        let next = report.next_attempt.unwrap();
        assert_eq!(next.attempt_number, 2);
        assert_eq!(next.status, AttemptStatus::Pending);

        let ep = h.store.get_endpoint(&h.endpoint.id).unwrap().unwrap();
        assert_eq!((ep.delivery_count, ep.failure_count), (1, 1));
        assert_eq!(ep.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_client_error_is_permanent() {
        let h = harness(vec![MockReply::Status(422)], RetryConfig::default(), 1_000);
        let attempt = sending_attempt(&h, 3);

        let report = h.dispatcher.execute(&h.endpoint, attempt).await.unwrap();
        assert_eq!(report.attempt.status, AttemptStatus::FailedPermanent);
        assert!(report.next_attempt.is_none());
    }

    #[tokio::test]
    async fn test_last_attempt_exhausts() {
        let h = harness(vec![MockReply::Status(503)], RetryConfig::default(), 1_000);
        let attempt = sending_attempt(&h, 1);

        let report = h.dispatcher.execute(&h.endpoint, attempt).await.unwrap();
        assert_eq!(report.attempt.status, AttemptStatus::Exhausted);
        assert!(report.next_attempt.is_none());
    }

    #[tokio::test]
    async fn test_panicking_transport_is_retryable() {
        let h = harness(vec![MockReply::Panic], RetryConfig::default(), 1_000);
        let attempt = sending_attempt(&h, 3);

        let report = h.dispatcher.execute(&h.endpoint, attempt).await.unwrap();
        assert_eq!(report.attempt.status, AttemptStatus::FailedRetryable);
        assert!(report
            .attempt
            .error_message
            .as_deref()
            .unwrap()
            .contains("panicked"));
    }

    #[tokio::test]
    async fn test_outer_timeout_guard() {
        let h = harness(
            vec![MockReply::Delayed(Duration::from_secs(5), 200)],
            RetryConfig::default(),
            50,
        );
        let attempt = sending_attempt(&h, 3);

        let report = h.dispatcher.execute(&h.endpoint, attempt).await.unwrap();
        assert_eq!(report.attempt.status, AttemptStatus::FailedRetryable);
        assert!(report
            .attempt
            .error_message
            .as_deref()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn test_connection_error_is_retryable() {
        let h = harness(
            vec![MockReply::Fail(TransportError::Connect("refused".to_string()))],
            RetryConfig::default(),
            1_000,
        );
        let attempt = sending_attempt(&h, 3);

        let report = h.dispatcher.execute(&h.endpoint, attempt).await.unwrap();
        assert_eq!(report.attempt.status, AttemptStatus::FailedRetryable);
        assert_eq!(report.attempt.response_status_code, None);
    }

    #[tokio::test]
    async fn test_auto_disable_after_threshold() {
        let retry = RetryConfig {
            auto_disable_after: 2,
            ..RetryConfig::default()
        };
        let h = harness(
            vec![MockReply::Status(404), MockReply::Status(404)],
            retry,
            1_000,
        );

        let first = h
            .dispatcher
            .execute(&h.endpoint, sending_attempt(&h, 3))
            .await
            .unwrap();
        assert!(!first.endpoint_disabled);

        let second = h
            .dispatcher
            .execute(&h.endpoint, sending_attempt(&h, 3))
            .await
            .unwrap();
        assert!(second.endpoint_disabled);

        let ep = h.store.get_endpoint(&h.endpoint.id).unwrap().unwrap();
        assert!(!ep.active);
        assert!(ep.disabled_at.is_some());
    }

    #[tokio::test]
    async fn test_cancel_skips_http_and_counters() {
        let h = harness(vec![], RetryConfig::default(), 1_000);
        let attempt = sending_attempt(&h, 3);

        let report = h.dispatcher.cancel(attempt, "endpoint disabled").unwrap();
        assert_eq!(report.attempt.status, AttemptStatus::FailedPermanent);
        assert_eq!(report.attempt.error_message.as_deref(), Some("endpoint disabled"));
        assert_eq!(h.transport.sent_count(), 0);

        let ep = h.store.get_endpoint(&h.endpoint.id).unwrap().unwrap();
        assert_eq!(ep.delivery_count, 0);
    }

    #[tokio::test]
    async fn test_finalize_rejects_settled_attempt() {
        let h = harness(vec![], RetryConfig::default(), 1_000);
        let attempt = sending_attempt(&h, 3);
        h.dispatcher.cancel(attempt.clone(), "endpoint disabled").unwrap();

        let late = h.dispatcher.finalize(
            Some(&h.endpoint),
            attempt,
            SendOutcome {
                status_code: Some(200),
                response_time_ms: Some(5),
                failure: None,
            },
        );
        assert!(matches!(late, Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_probe_records_nothing() {
        let h = harness(vec![MockReply::Status(204)], RetryConfig::default(), 1_000);

        let outcome = h
            .dispatcher
            .probe(&h.endpoint, b"{}".to_vec(), "webhook.test")
            .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.status_code, Some(204));

        let stats = h.store.endpoint_stats(&h.endpoint.id).unwrap();
        assert_eq!(stats.total, 0);
    }
}
