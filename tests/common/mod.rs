//! Shared helpers for integration tests.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic, dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use webhook_engine::EngineConfig;
use webhook_engine::models::{AttemptStatus, DeliveryAttempt, EndpointId};
use webhook_engine::storage::{AttemptStore, SqliteWebhookStore};
use webhook_engine::webhooks::transport::TransportFuture;
use webhook_engine::webhooks::{
    OutboundRequest, TransportError, TransportResponse, WebhookService, WebhookTransport,
};

/// Scripted reply for [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer with this status.
    Status(u16),
    /// Wait, then answer 200.
    Slow(Duration),
    /// Fail to connect.
    Refused,
    /// Panic inside the transport.
    Panic,
}

/// Transport answering from a script and recording every request.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    sent: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedTransport {
    /// Creates a transport answering `replies` in order, then 200 forever.
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Requests sent so far.
    pub fn sent(&self) -> Vec<OutboundRequest> {
        self.sent.lock().unwrap().clone()
    }
}

impl WebhookTransport for ScriptedTransport {
    fn send(&self, request: OutboundRequest) -> TransportFuture<'_> {
        self.sent.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Status(200));

        Box::pin(async move {
            match reply {
                Reply::Status(status) => Ok(TransportResponse {
                    status,
                    body_excerpt: None,
                }),
                Reply::Slow(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(TransportResponse {
                        status: 200,
                        body_excerpt: None,
                    })
                },
                Reply::Refused => Err(TransportError::Connect("connection refused".to_string())),
                Reply::Panic => panic!("scripted transport panic"),
            }
        })
    }
}

/// A service over an in-memory store and a scripted transport.
pub struct TestEngine {
    pub service: WebhookService,
    pub store: Arc<SqliteWebhookStore>,
    pub transport: Arc<ScriptedTransport>,
}

/// Engine config with millisecond backoff so retries are due immediately.
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 1;
    config.worker.poll_interval_ms = 10;
    config
}

/// Builds an engine answering `replies` in order.
pub fn engine(config: &EngineConfig, replies: impl IntoIterator<Item = Reply>) -> TestEngine {
    let store = Arc::new(SqliteWebhookStore::in_memory().unwrap());
    let transport = Arc::new(ScriptedTransport::new(replies));
    let service = WebhookService::new(store.clone(), store.clone(), transport.clone(), config);
    TestEngine {
        service,
        store,
        transport,
    }
}

/// Stores a first attempt that failed retryably ten minutes ago and whose
/// retry was never written, as left behind by a crash between the two writes.
pub fn stranded_retry(store: &SqliteWebhookStore, endpoint_id: &EndpointId) -> DeliveryAttempt {
    let failed_at = Utc::now() - TimeDelta::minutes(10);
    let mut attempt = DeliveryAttempt::first(
        endpoint_id.clone(),
        "invoice.created",
        r#"{"type":"invoice.created","data":{"invoiceId":"INV-009"}}"#.to_string(),
        3,
        failed_at,
    );
    attempt.status = AttemptStatus::FailedRetryable;
    attempt.response_status_code = Some(503);
    attempt.error_message = Some("HTTP 503 Service Unavailable".to_string());
    attempt.sent_at = Some(failed_at);
    attempt.completed_at = Some(failed_at);
    store.upsert_attempt(&attempt).unwrap();
    attempt
}
