//! Outbound webhook delivery.
//!
//! [`WebhookService`] is the entry point. It ties together the pieces below
//! and turns expected business failures (bad URL, unknown endpoint, terminal
//! delivery) into `success: false` results rather than errors.
//!
//! # Architecture
//!
//! - **Signature** (`signature.rs`): `sha256=<hex>` HMAC signing and verification
//! - **Registry** (`registry.rs`): endpoint validation and persistence
//! - **Transport** (`transport.rs`): one HTTP POST behind a trait
//! - **Bulkhead** (`bulkhead.rs`): per-endpoint and global concurrency limits
//! - **Dispatcher** (`dispatcher.rs`): executes and classifies one attempt
//! - **Retry** (`retry.rs`): backoff, dead-lettering and auto-disable
//! - **Worker** (`worker.rs`): runs due retries and recovers interrupted sends
//!
//! # Delivery Flow
//!
//! ```text
//! deliver_event ──► attempt 1 (sending) ──► Dispatcher ──► transport
//!                                               │
//!                        succeeded ◄────────────┼────────► failed_permanent
//!                                               ▼
//!                                    failed_retryable ──► pending n+1 ──► DeliveryWorker
//!                                               │
//!                                   (last attempt) exhausted
//! ```
//!
//! # Headers
//!
//! | Header | Value |
//! |--------|-------|
//! | `Content-Type` | `application/json` |
//! | `X-Webhook-Signature` | `sha256=<hex hmac of the body>` |
//! | `X-Webhook-Event` | Event type |
//! | `User-Agent` | `webhook-engine/<version>` |
//!
//! Every attempt of a delivery carries the same body and headers, so
//! subscribers see a retry only as a repeated delivery.

pub mod bulkhead;
pub mod dispatcher;
pub mod registry;
pub mod retry;
pub mod signature;
pub mod transport;
pub mod worker;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

pub use bulkhead::{BulkheadConfig, DeliveryBulkhead};
pub use dispatcher::{
    DeliveryConfig, DeliveryFailure, DispatchReport, Dispatcher, SendOutcome, classify_status,
};
pub use registry::EndpointRegistry;
pub use retry::{RetryConfig, RetryPolicy, RetryScheduler};
pub use transport::{HttpTransport, OutboundRequest, TransportError, TransportResponse, WebhookTransport};
pub use worker::{DeliveryWorker, TickReport, WorkerConfig, WorkerHandle};

use crate::config::EngineConfig;
use crate::models::{
    AttemptStatus, DeliveryAttempt, DeliveryId, EndpointFilter, EndpointId, EndpointPatch, Event,
    NewEndpoint, WebhookEndpoint,
};
use crate::storage::{AttemptStats, AttemptStore, EndpointStore, SqliteWebhookStore};
use crate::{Error, Result};

/// Result of [`WebhookService::create_webhook`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWebhookResult {
    /// Whether the endpoint was registered.
    pub success: bool,
    /// ID of the new endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<EndpointId>,
    /// Plaintext signing secret. Only ever returned here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Why registration was refused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CreateWebhookResult {
    fn rejected(error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Result of [`WebhookService::deliver_event`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverEventResult {
    /// Whether the first attempt succeeded.
    pub success: bool,
    /// Delivery created for the event, absent when the call failed fast.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<DeliveryId>,
    /// Whether a retry was scheduled.
    pub retryable: bool,
    /// Status of the first attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AttemptStatus>,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliverEventResult {
    fn rejected(error: String) -> Self {
        Self {
            success: false,
            delivery_id: None,
            retryable: false,
            status: None,
            error: Some(error),
        }
    }

    fn from_report(report: &DispatchReport) -> Self {
        Self {
            success: report.succeeded(),
            delivery_id: Some(report.attempt.delivery_id.clone()),
            retryable: report.retry_scheduled(),
            status: Some(report.attempt.status),
            error: report.attempt.error_message.clone(),
        }
    }
}

/// Result of [`WebhookService::test_webhook`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestWebhookResult {
    /// Whether the endpoint answered 2xx.
    pub success: bool,
    /// Round trip time in milliseconds.
    pub response_time: u64,
    /// HTTP status returned, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of [`WebhookService::retry_delivery`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryDeliveryResult {
    /// Whether the retried attempt succeeded.
    pub success: bool,
    /// The delivery that was retried.
    pub delivery_id: Option<DeliveryId>,
    /// Number of the attempt that was executed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_number: Option<u32>,
    /// Status of the executed attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AttemptStatus>,
    /// Whether another retry was scheduled.
    pub retryable: bool,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RetryDeliveryResult {
    fn rejected(delivery_id: &DeliveryId, error: String) -> Self {
        Self {
            delivery_id: Some(delivery_id.clone()),
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Delivery counters and attempt statistics for one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStats {
    /// Endpoint the statistics describe.
    pub endpoint_id: EndpointId,
    /// Whether the endpoint is active.
    pub active: bool,
    /// Attempts completed against the endpoint.
    pub delivery_count: u64,
    /// Attempts that succeeded.
    pub success_count: u64,
    /// Attempts that failed.
    pub failure_count: u64,
    /// Current streak of terminal failures.
    pub consecutive_failures: u32,
    /// Aggregates over the retained attempt log.
    pub attempts: AttemptStats,
}

/// Tasks started by [`WebhookService::publish`].
pub struct FanOut {
    /// Endpoints the event was sent to.
    pub endpoint_ids: Vec<EndpointId>,
    handles: Vec<JoinHandle<()>>,
}

impl FanOut {
    /// Number of endpoints receiving the event.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoint_ids.len()
    }

    /// Whether no endpoint subscribed to the event.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoint_ids.is_empty()
    }

    /// Waits for every first attempt to finish.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Webhook fan-out task failed");
            }
        }
    }
}

/// Webhook delivery facade.
///
/// Cheap to clone; clones share storage, transport and bulkheads.
#[derive(Clone)]
pub struct WebhookService {
    registry: EndpointRegistry,
    endpoints: Arc<dyn EndpointStore>,
    attempts: Arc<dyn AttemptStore>,
    dispatcher: Arc<Dispatcher>,
    worker_config: WorkerConfig,
}

impl WebhookService {
    /// Creates a service over explicit collaborators.
    #[must_use]
    pub fn new(
        endpoints: Arc<dyn EndpointStore>,
        attempts: Arc<dyn AttemptStore>,
        transport: Arc<dyn WebhookTransport>,
        config: &EngineConfig,
    ) -> Self {
        let scheduler =
            RetryScheduler::new(Arc::clone(&endpoints), Arc::clone(&attempts), &config.retry);
        let dispatcher = Dispatcher::new(
            transport,
            Arc::clone(&endpoints),
            Arc::clone(&attempts),
            scheduler,
            &config.delivery,
        );

        Self {
            registry: EndpointRegistry::new(Arc::clone(&endpoints)),
            endpoints,
            attempts,
            dispatcher: Arc::new(dispatcher),
            worker_config: config.worker,
        }
    }

    /// Creates a service backed by `SQLite` and the `reqwest` transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the HTTP client
    /// cannot be built.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let store = Arc::new(SqliteWebhookStore::new(&config.database_path())?);
        let transport = Arc::new(HttpTransport::new(config.delivery.timeout())?);
        Ok(Self::new(store.clone(), store, transport, config))
    }

    /// The endpoint registry.
    #[must_use]
    pub const fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// The dispatcher executing attempts.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Registers an endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures; validation failures are
    /// reported in the result.
    pub fn create_webhook(&self, data: NewEndpoint) -> Result<CreateWebhookResult> {
        match self.registry.create(data) {
            Ok((endpoint, secret)) => Ok(CreateWebhookResult {
                success: true,
                webhook_id: Some(endpoint.id),
                secret: Some(secret),
                error: None,
            }),
            Err(e) if e.is_client_error() => Ok(CreateWebhookResult::rejected(e.user_message())),
            Err(e) => Err(e),
        }
    }

    /// Delivers an event to one endpoint, performing attempt 1 inline.
    ///
    /// Missing or disabled endpoints fail fast without creating a delivery.
    /// A retryable failure leaves attempt 2 scheduled for the worker.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn deliver_event(
        &self,
        endpoint_id: &EndpointId,
        event: &Event,
    ) -> Result<DeliverEventResult> {
        let endpoint = match self.active_endpoint(endpoint_id)? {
            Ok(endpoint) => endpoint,
            Err(reason) => return Ok(DeliverEventResult::rejected(reason)),
        };
        if event.event_type == "*" {
            return Ok(DeliverEventResult::rejected(
                "Invalid event type: '*' is only valid as a subscription".to_string(),
            ));
        }
        if let Err(e) = registry::validate_event_type(&event.event_type) {
            return Ok(DeliverEventResult::rejected(e.user_message()));
        }
        let payload = match event.to_canonical_json() {
            Ok(payload) => payload,
            Err(e) => return Ok(DeliverEventResult::rejected(e.user_message())),
        };

        let now = Utc::now();
        let policy = self.dispatcher.scheduler().policy_for(&endpoint);
        let mut attempt = DeliveryAttempt::first(
            endpoint.id.clone(),
            &event.event_type,
            payload,
            policy.max_attempts,
            now,
        );
        attempt.status = AttemptStatus::Sending;
        attempt.sent_at = Some(now);
        self.attempts.upsert_attempt(&attempt)?;

        let report = self.dispatcher.execute(&endpoint, attempt).await?;
        Ok(DeliverEventResult::from_report(&report))
    }

    /// Sends one signed test event and reports the round trip.
    ///
    /// Nothing is written to the delivery history and counters are left
    /// untouched. Disabled endpoints can be tested.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures.
    pub async fn test_webhook(
        &self,
        endpoint_id: &EndpointId,
        payload: Option<Event>,
    ) -> Result<TestWebhookResult> {
        let Some(endpoint) = self.registry.find(endpoint_id)? else {
            return Ok(TestWebhookResult {
                error: Some(format!("Webhook not found: {endpoint_id}")),
                ..TestWebhookResult::default()
            });
        };

        let event = payload.unwrap_or_else(Event::test_event);
        let body = match event.to_canonical_json() {
            Ok(body) => body,
            Err(e) => {
                return Ok(TestWebhookResult {
                    error: Some(e.user_message()),
                    ..TestWebhookResult::default()
                });
            },
        };

        let started = Instant::now();
        let outcome = self
            .dispatcher
            .probe(&endpoint, body.into_bytes(), &event.event_type)
            .await;
        let response_time = outcome
            .response_time_ms
            .unwrap_or_else(|| u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));

        tracing::info!(
            endpoint_id = %endpoint_id,
            success = outcome.is_success(),
            status_code = ?outcome.status_code,
            response_time_ms = response_time,
            "Tested webhook endpoint"
        );

        Ok(TestWebhookResult {
            success: outcome.is_success(),
            response_time,
            status_code: outcome.status_code,
            error: outcome.failure.map(|f| f.to_string()),
        })
    }

    /// Retries a delivery now.
    ///
    /// A `failed_retryable` delivery gets a new attempt; a `pending` one is
    /// expedited. Succeeded, permanently failed, exhausted and in-flight
    /// deliveries are refused without creating anything.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures.
    pub async fn retry_delivery(&self, delivery_id: &DeliveryId) -> Result<RetryDeliveryResult> {
        let Some(latest) = self.attempts.latest_attempt(delivery_id)? else {
            return Ok(RetryDeliveryResult::rejected(
                delivery_id,
                format!("Delivery not found: {delivery_id}"),
            ));
        };
        let endpoint = match self.active_endpoint(&latest.endpoint_id)? {
            Ok(endpoint) => endpoint,
            Err(reason) => return Ok(RetryDeliveryResult::rejected(delivery_id, reason)),
        };

        let attempt = match self.dispatcher.scheduler().rearm(delivery_id, Utc::now()) {
            Ok(attempt) => attempt,
            Err(e) if e.is_client_error() => {
                return Ok(RetryDeliveryResult::rejected(delivery_id, e.user_message()));
            },
            Err(e) => return Err(e),
        };

        tracing::info!(
            delivery_id = %delivery_id,
            attempt_number = attempt.attempt_number,
            "Retrying webhook delivery"
        );
        let report = self.dispatcher.execute(&endpoint, attempt).await?;

        Ok(RetryDeliveryResult {
            success: report.succeeded(),
            delivery_id: Some(delivery_id.clone()),
            attempt_number: Some(report.attempt.attempt_number),
            status: Some(report.attempt.status),
            retryable: report.retry_scheduled(),
            error: report.attempt.error_message,
        })
    }

    /// Delivers an event to every active endpoint subscribed to its type.
    ///
    /// Each delivery runs on its own task; failures are logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoints cannot be listed.
    pub fn publish(&self, event: &Event) -> Result<FanOut> {
        let targets = self
            .registry
            .list(&EndpointFilter::active().for_event(&event.event_type))?;

        let mut endpoint_ids = Vec::with_capacity(targets.len());
        let mut handles = Vec::with_capacity(targets.len());
        for endpoint in targets {
            let service = self.clone();
            let event = event.clone();
            let endpoint_id = endpoint.id.clone();
            endpoint_ids.push(endpoint.id);

            handles.push(tokio::spawn(async move {
                match service.deliver_event(&endpoint_id, &event).await {
                    Ok(result) if result.success => {},
                    Ok(result) => tracing::warn!(
                        endpoint_id = %endpoint_id,
                        event_type = %event.event_type,
                        retryable = result.retryable,
                        error = result.error.as_deref().unwrap_or(""),
                        "Published event was not delivered"
                    ),
                    Err(e) => tracing::error!(
                        endpoint_id = %endpoint_id,
                        event_type = %event.event_type,
                        error = %e,
                        "Failed to publish event"
                    ),
                }
            }));
        }

        metrics::counter!("webhook_events_published_total").increment(1);
        tracing::debug!(
            event_type = %event.event_type,
            endpoints = endpoint_ids.len(),
            "Published event"
        );
        Ok(FanOut {
            endpoint_ids,
            handles,
        })
    }

    /// Signs a payload with a secret.
    #[must_use]
    pub fn generate_signature(&self, payload: &[u8], secret: &str) -> String {
        signature::sign(payload, secret)
    }

    /// Verifies a payload signature.
    #[must_use]
    pub fn verify_signature(&self, payload: &[u8], signature: &str, secret: &str) -> bool {
        signature::verify(payload, signature, secret)
    }

    /// Retrieves an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown IDs, or a storage error.
    pub fn get_webhook(&self, id: &EndpointId) -> Result<WebhookEndpoint> {
        self.registry.get(id)
    }

    /// Lists endpoints.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn list_webhooks(&self, filter: &EndpointFilter) -> Result<Vec<WebhookEndpoint>> {
        self.registry.list(filter)
    }

    /// Updates an endpoint's configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::InvalidInput`], or a storage error.
    pub fn update_webhook(&self, id: &EndpointId, patch: EndpointPatch) -> Result<WebhookEndpoint> {
        self.registry.update(id, patch)
    }

    /// Disables an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown IDs, or a storage error.
    pub fn disable_webhook(&self, id: &EndpointId) -> Result<WebhookEndpoint> {
        self.registry.disable(id)
    }

    /// Re-enables an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown IDs, or a storage error.
    pub fn enable_webhook(&self, id: &EndpointId) -> Result<WebhookEndpoint> {
        self.registry.enable(id)
    }

    /// Replaces an endpoint's secret and returns the new one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown IDs, or a storage error.
    pub fn rotate_secret(&self, id: &EndpointId) -> Result<String> {
        self.registry.rotate_secret(id)
    }

    /// All attempts of a delivery, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the delivery has no attempts.
    pub fn delivery_history(&self, delivery_id: &DeliveryId) -> Result<Vec<DeliveryAttempt>> {
        let attempts = self.attempts.delivery_attempts(delivery_id)?;
        if attempts.is_empty() {
            return Err(Error::NotFound {
                kind: "delivery",
                id: delivery_id.to_string(),
            });
        }
        Ok(attempts)
    }

    /// Most recent attempts against an endpoint, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown endpoints, or a storage error.
    pub fn endpoint_history(
        &self,
        endpoint_id: &EndpointId,
        limit: usize,
    ) -> Result<Vec<DeliveryAttempt>> {
        self.registry.get(endpoint_id)?;
        self.attempts.endpoint_attempts(endpoint_id, limit)
    }

    /// Counters and attempt statistics for an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown endpoints, or a storage error.
    pub fn endpoint_stats(&self, endpoint_id: &EndpointId) -> Result<EndpointStats> {
        let endpoint = self.registry.get(endpoint_id)?;
        let attempts = self.attempts.endpoint_stats(endpoint_id)?;
        Ok(EndpointStats {
            endpoint_id: endpoint.id,
            active: endpoint.active,
            delivery_count: endpoint.delivery_count,
            success_count: endpoint.success_count,
            failure_count: endpoint.failure_count,
            consecutive_failures: endpoint.consecutive_failures,
            attempts,
        })
    }

    /// Deletes the attempt logs of finished deliveries older than `older_than`.
    ///
    /// Returns the number of attempt rows removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the age cannot be represented, or a
    /// storage error.
    pub fn purge_history(&self, older_than: Duration) -> Result<usize> {
        let cutoff = TimeDelta::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .ok_or_else(|| {
                Error::InvalidInput(format!("Retention period {older_than:?} is out of range"))
            })?;

        let removed = self.attempts.purge_finished_before(cutoff)?;
        tracing::info!(removed, cutoff = %cutoff, "Purged webhook delivery history");
        Ok(removed)
    }

    /// Builds a delivery worker sharing this service's dispatcher.
    #[must_use]
    pub fn worker(&self) -> DeliveryWorker {
        DeliveryWorker::new(
            Arc::clone(&self.endpoints),
            Arc::clone(&self.attempts),
            Arc::clone(&self.dispatcher),
            self.worker_config,
        )
    }

    /// Starts the delivery worker in the background.
    #[must_use]
    pub fn spawn_worker(&self) -> WorkerHandle {
        self.worker().spawn()
    }

    /// Resolves an endpoint that may receive deliveries.
    ///
    /// The inner `Err` carries the user-facing refusal.
    fn active_endpoint(
        &self,
        endpoint_id: &EndpointId,
    ) -> Result<std::result::Result<WebhookEndpoint, String>> {
        Ok(match self.registry.find(endpoint_id)? {
            None => Err(format!("Webhook not found: {endpoint_id}")),
            Some(endpoint) if !endpoint.active => Err(format!("Webhook is disabled: {endpoint_id}")),
            Some(endpoint) => Ok(endpoint),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhooks::transport::{MockReply, MockTransport};
    use serde_json::json;

    fn service(replies: Vec<MockReply>) -> (WebhookService, Arc<MockTransport>) {
        let store = Arc::new(SqliteWebhookStore::in_memory().unwrap());
        let transport = Arc::new(MockTransport::new(replies));
        let service = WebhookService::new(
            store.clone(),
            store,
            transport.clone(),
            &EngineConfig::default(),
        );
        (service, transport)
    }

    fn create(service: &WebhookService) -> (EndpointId, String) {
        let created = service
            .create_webhook(NewEndpoint::new("https://x.test/hook"))
            .unwrap();
        assert!(created.success);
        (created.webhook_id.unwrap(), created.secret.unwrap())
    }

    fn invoice_event() -> Event {
        Event::new(
            "invoice.created",
            json!({"invoiceId": "INV-001", "amount": 100}),
        )
    }

    #[test]
    fn test_create_webhook_rejects_invalid_url() {
        let (service, _) = service(vec![]);
        let result = service
            .create_webhook(NewEndpoint::new("invalid-url"))
            .unwrap();
        assert!(!result.success);
        assert!(result.webhook_id.is_none());
        assert!(result.error.unwrap().contains("Invalid URL"));
    }

    #[tokio::test]
    async fn test_deliver_event_success_records_one_attempt() {
        let (service, transport) = service(vec![MockReply::Status(200)]);
        let (id, secret) = create(&service);

        let result = service.deliver_event(&id, &invoice_event()).await.unwrap();
        assert!(result.success);
        assert!(!result.retryable);

        let history = service
            .delivery_history(&result.delivery_id.unwrap())
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].attempt_number, 1);
        assert_eq!(history[0].status, AttemptStatus::Succeeded);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(
            sent[0].signature,
            service.generate_signature(&sent[0].body, &secret)
        );
    }

    #[tokio::test]
    async fn test_deliver_event_server_error_schedules_retry() {
        let (service, _) = service(vec![MockReply::Status(500)]);
        let (id, _) = create(&service);

        let result = service.deliver_event(&id, &invoice_event()).await.unwrap();
        assert!(!result.success);
        assert!(result.retryable);
        assert_eq!(result.status, Some(AttemptStatus::FailedRetryable));

        let history = service
            .delivery_history(&result.delivery_id.unwrap())
            .unwrap();
        assert_eq!(history.len(), 2);
        let completed = history[0].completed_at.unwrap();
        assert_eq!(history[1].status, AttemptStatus::Pending);
        assert!(history[1].scheduled_at >= completed + TimeDelta::seconds(1));
    }

    #[tokio::test]
    async fn test_deliver_event_fails_fast_for_missing_or_disabled() {
        let (service, transport) = service(vec![]);
        let missing = service
            .deliver_event(&EndpointId::new("nope"), &invoice_event())
            .await
            .unwrap();
        assert!(!missing.success);
        assert!(!missing.retryable);
        assert!(missing.delivery_id.is_none());

        let (id, _) = create(&service);
        service.disable_webhook(&id).unwrap();
        let disabled = service.deliver_event(&id, &invoice_event()).await.unwrap();
        assert!(!disabled.success);
        assert!(disabled.error.unwrap().contains("disabled"));
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_retry_delivery_refuses_succeeded() {
        let (service, transport) = service(vec![MockReply::Status(200)]);
        let (id, _) = create(&service);
        let delivered = service.deliver_event(&id, &invoice_event()).await.unwrap();
        let delivery_id = delivered.delivery_id.unwrap();

        let retried = service.retry_delivery(&delivery_id).await.unwrap();
        assert!(!retried.success);
        assert!(retried.error.is_some());
        assert_eq!(service.delivery_history(&delivery_id).unwrap().len(), 1);
        assert_eq!(transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_delivery_expedites_pending_attempt() {
        let (service, _) = service(vec![MockReply::Status(503), MockReply::Status(200)]);
        let (id, _) = create(&service);
        let delivered = service.deliver_event(&id, &invoice_event()).await.unwrap();
        let delivery_id = delivered.delivery_id.unwrap();

        let retried = service.retry_delivery(&delivery_id).await.unwrap();
        assert!(retried.success);
        assert_eq!(retried.attempt_number, Some(2));

        let history = service.delivery_history(&delivery_id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].status, AttemptStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_retry_unknown_delivery() {
        let (service, _) = service(vec![]);
        let result = service
            .retry_delivery(&DeliveryId::new("missing"))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_webhook_probe_is_not_recorded() {
        let (service, transport) = service(vec![MockReply::Status(204)]);
        let (id, _) = create(&service);

        let result = service.test_webhook(&id, None).await.unwrap();
        assert!(result.success);
        assert_eq!(result.status_code, Some(204));
        assert_eq!(transport.sent_count(), 1);
        assert!(service.endpoint_history(&id, 10).unwrap().is_empty());
        assert_eq!(service.endpoint_stats(&id).unwrap().delivery_count, 0);
    }

    #[tokio::test]
    async fn test_publish_fans_out_to_subscribers() {
        let (service, transport) = service(vec![]);
        for events in [vec!["invoice.created"], vec!["*"], vec!["invoice.paid"]] {
            let created = service
                .create_webhook(NewEndpoint::new("https://x.test/hook").with_events(events))
                .unwrap();
            assert!(created.success);
        }

        let fan_out = service.publish(&invoice_event()).unwrap();
        assert_eq!(fan_out.len(), 2);
        fan_out.join().await;
        assert_eq!(transport.sent_count(), 2);
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = CreateWebhookResult {
            success: true,
            webhook_id: Some(EndpointId::new("ep")),
            secret: Some("s".to_string()),
            error: None,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value, json!({"success": true, "webhookId": "ep", "secret": "s"}));
    }
}
