//! Integration tests for webhook delivery.
//!
//! Drives [`WebhookService`] end to end over an in-memory `SQLite` store and
//! a scripted transport:
//! - Registration validation
//! - Signed delivery and outbound headers
//! - Retry scheduling, exhaustion and auto-disable
//! - Manual retry, worker processing and crash recovery

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Reply, engine, fast_config};
use webhook_engine::models::{EndpointFilter, NewEndpoint};
use webhook_engine::storage::AttemptStore;
use webhook_engine::{AttemptStatus, EngineConfig, EndpointId, Event};

fn invoice_event() -> Event {
    Event::new(
        "invoice.created",
        serde_json::json!({"invoiceId": "INV-001", "amount": 100}),
    )
}

fn register(service: &webhook_engine::WebhookService, url: &str) -> (EndpointId, String) {
    let created = service
        .create_webhook(NewEndpoint::new(url).with_events(["invoice.created"]))
        .unwrap();
    assert!(created.success, "registration failed: {:?}", created.error);
    (created.webhook_id.unwrap(), created.secret.unwrap())
}

// ============================================================================
// Registration
// ============================================================================

#[test]
fn test_create_rejects_invalid_url() {
    let engine = engine(&EngineConfig::default(), []);

    let result = engine
        .service
        .create_webhook(NewEndpoint::new("invalid-url"))
        .unwrap();

    assert!(!result.success);
    assert!(result.webhook_id.is_none());
    assert!(result.error.unwrap().contains("Invalid URL"));
    assert!(
        engine
            .service
            .list_webhooks(&EndpointFilter::default())
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_secret_is_returned_once_and_redacted_afterwards() {
    let engine = engine(&EngineConfig::default(), []);
    let (id, secret) = register(&engine.service, "https://x.test/hook");

    assert_eq!(secret.len(), 64);
    let shown = serde_json::to_string(&engine.service.get_webhook(&id).unwrap()).unwrap();
    assert!(!shown.contains(&secret));
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test]
async fn test_end_to_end_signed_delivery() {
    let engine = engine(&EngineConfig::default(), [Reply::Status(200)]);
    let (id, secret) = register(&engine.service, "https://x.test/hook");

    let result = engine
        .service
        .deliver_event(&id, &invoice_event())
        .await
        .unwrap();
    assert!(result.success);
    assert!(!result.retryable);

    let sent = engine.transport.sent();
    assert_eq!(sent.len(), 1);
    let request = &sent[0];
    assert_eq!(request.url, "https://x.test/hook");
    assert_eq!(request.event_type, "invoice.created");
    assert_eq!(
        request.signature,
        engine.service.generate_signature(&request.body, &secret)
    );
    assert!(
        engine
            .service
            .verify_signature(&request.body, &request.signature, &secret)
    );

    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["type"], "invoice.created");
    assert_eq!(body["data"]["invoiceId"], "INV-001");
    assert_eq!(body["data"]["amount"], 100);

    let delivery_id = result.delivery_id.unwrap();
    let history = engine.service.delivery_history(&delivery_id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, AttemptStatus::Succeeded);
    assert_eq!(history[0].attempt_number, 1);
    assert_eq!(history[0].response_status_code, Some(200));
    assert_eq!(history[0].signature.as_deref(), Some(request.signature.as_str()));
}

#[tokio::test]
async fn test_server_error_schedules_second_attempt() {
    let engine = engine(&EngineConfig::default(), [Reply::Status(500)]);
    let (id, _) = register(&engine.service, "https://x.test/hook");

    let result = engine
        .service
        .deliver_event(&id, &invoice_event())
        .await
        .unwrap();
    assert!(!result.success);
    assert!(result.retryable);
    assert_eq!(result.status, Some(AttemptStatus::FailedRetryable));

    let history = engine
        .service
        .delivery_history(&result.delivery_id.unwrap())
        .unwrap();
    assert_eq!(history.len(), 2);
    let first = &history[0];
    let second = &history[1];
    assert_eq!(second.attempt_number, 2);
    assert_eq!(second.status, AttemptStatus::Pending);
    assert!(second.scheduled_at >= first.completed_at.unwrap() + chrono::Duration::seconds(1));
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let engine = engine(&EngineConfig::default(), [Reply::Status(404)]);
    let (id, _) = register(&engine.service, "https://x.test/hook");

    let result = engine
        .service
        .deliver_event(&id, &invoice_event())
        .await
        .unwrap();
    assert!(!result.success);
    assert!(!result.retryable);
    assert_eq!(result.status, Some(AttemptStatus::FailedPermanent));
    assert_eq!(
        engine
            .service
            .delivery_history(&result.delivery_id.unwrap())
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_delivery_to_disabled_endpoint_fails_fast() {
    let engine = engine(&EngineConfig::default(), []);
    let (id, _) = register(&engine.service, "https://x.test/hook");
    engine.service.disable_webhook(&id).unwrap();

    let result = engine
        .service
        .deliver_event(&id, &invoice_event())
        .await
        .unwrap();
    assert!(!result.success);
    assert!(result.delivery_id.is_none());
    assert!(result.error.unwrap().contains("disabled"));
    assert!(engine.transport.sent().is_empty());
}

// ============================================================================
// Retries
// ============================================================================

#[tokio::test]
async fn test_exhaustion_after_max_attempts() {
    let config = fast_config();
    let engine = engine(
        &config,
        [Reply::Status(503), Reply::Refused, Reply::Status(500)],
    );
    let (id, _) = register(&engine.service, "https://x.test/hook");
    let worker = engine.service.worker();

    let result = engine
        .service
        .deliver_event(&id, &invoice_event())
        .await
        .unwrap();
    let delivery_id = result.delivery_id.unwrap();

    for _ in 0..2 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let report = worker.run_once().await.unwrap();
        assert_eq!(report.claimed, 1);
    }

    let history = engine.service.delivery_history(&delivery_id).unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].status, AttemptStatus::FailedRetryable);
    assert_eq!(history[1].status, AttemptStatus::FailedRetryable);
    assert_eq!(history[2].status, AttemptStatus::Exhausted);
    assert!(history.iter().all(|a| a.delivery_id == delivery_id));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let report = worker.run_once().await.unwrap();
    assert!(report.is_idle());
    assert_eq!(engine.transport.sent().len(), 3);

    let retry = engine.service.retry_delivery(&delivery_id).await.unwrap();
    assert!(!retry.success);
    assert_eq!(engine.service.delivery_history(&delivery_id).unwrap().len(), 3);
}

#[tokio::test]
async fn test_retry_of_succeeded_delivery_is_noop() {
    let engine = engine(&EngineConfig::default(), []);
    let (id, _) = register(&engine.service, "https://x.test/hook");

    let delivered = engine
        .service
        .deliver_event(&id, &invoice_event())
        .await
        .unwrap();
    let delivery_id = delivered.delivery_id.unwrap();

    let retry = engine.service.retry_delivery(&delivery_id).await.unwrap();
    assert!(!retry.success);
    assert!(retry.attempt_number.is_none());
    assert!(retry.error.unwrap().contains("succeeded"));
    assert_eq!(engine.service.delivery_history(&delivery_id).unwrap().len(), 1);
    assert_eq!(engine.transport.sent().len(), 1);
}

#[tokio::test]
async fn test_manual_retry_keeps_delivery_id() {
    let engine = engine(&EngineConfig::default(), [Reply::Status(502)]);
    let (id, _) = register(&engine.service, "https://x.test/hook");

    let delivered = engine
        .service
        .deliver_event(&id, &invoice_event())
        .await
        .unwrap();
    let delivery_id = delivered.delivery_id.unwrap();

    let retry = engine.service.retry_delivery(&delivery_id).await.unwrap();
    assert!(retry.success);
    assert_eq!(retry.attempt_number, Some(2));

    let sent = engine.transport.sent();
    assert_eq!(sent.len(), 2);
    // A retry is the same request again.
    assert_eq!(sent[0].body, sent[1].body);
    assert_eq!(sent[0].signature, sent[1].signature);

    let history = engine.service.delivery_history(&delivery_id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].attempt_number, 2);
}

#[tokio::test]
async fn test_endpoint_auto_disabled_after_consecutive_failures() {
    let mut config = fast_config();
    config.retry.auto_disable_after = 2;
    let engine = engine(&config, [Reply::Status(410), Reply::Status(410)]);
    let (id, _) = register(&engine.service, "https://x.test/hook");

    engine
        .service
        .deliver_event(&id, &invoice_event())
        .await
        .unwrap();
    assert!(engine.service.get_webhook(&id).unwrap().active);

    engine
        .service
        .deliver_event(&id, &invoice_event())
        .await
        .unwrap();
    let endpoint = engine.service.get_webhook(&id).unwrap();
    assert!(!endpoint.active);
    assert!(endpoint.disabled_at.is_some());
    assert_eq!(endpoint.consecutive_failures, 2);

    let rejected = engine
        .service
        .deliver_event(&id, &invoice_event())
        .await
        .unwrap();
    assert!(!rejected.success);
    assert_eq!(engine.transport.sent().len(), 2);
}

#[tokio::test]
async fn test_worker_cancels_retries_of_disabled_endpoint() {
    let engine = engine(&fast_config(), [Reply::Status(500)]);
    let (id, _) = register(&engine.service, "https://x.test/hook");

    let delivered = engine
        .service
        .deliver_event(&id, &invoice_event())
        .await
        .unwrap();
    engine.service.disable_webhook(&id).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let report = engine.service.worker().run_once().await.unwrap();
    assert_eq!(report.cancelled, 1);
    assert_eq!(engine.transport.sent().len(), 1);

    let history = engine
        .service
        .delivery_history(&delivered.delivery_id.unwrap())
        .unwrap();
    assert_eq!(history[1].status, AttemptStatus::FailedPermanent);
    assert_eq!(history[1].error_message.as_deref(), Some("Endpoint is disabled"));
}

#[tokio::test]
async fn test_worker_resumes_delivery_stranded_before_its_retry_was_stored() {
    let engine = engine(&EngineConfig::default(), []);
    let (id, _) = register(&engine.service, "https://x.test/hook");
    let stranded = common::stranded_retry(&engine.store, &id);

    let report = engine.service.worker().run_once().await.unwrap();
    assert_eq!(report.rescheduled, 1);
    assert_eq!(report.succeeded, 1);

    let history = engine
        .service
        .delivery_history(&stranded.delivery_id)
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].attempt_number, 2);
    assert_eq!(history[1].status, AttemptStatus::Succeeded);
    assert_eq!(engine.transport.sent()[0].body, stranded.payload.as_bytes());
}

#[tokio::test]
async fn test_spawned_worker_drains_due_retries() {
    let engine = engine(&fast_config(), [Reply::Status(500)]);
    let (id, _) = register(&engine.service, "https://x.test/hook");

    let delivered = engine
        .service
        .deliver_event(&id, &invoice_event())
        .await
        .unwrap();
    let delivery_id = delivered.delivery_id.unwrap();

    let handle = engine.service.spawn_worker();
    let mut settled = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let latest = engine.store.latest_attempt(&delivery_id).unwrap().unwrap();
        if latest.status == AttemptStatus::Succeeded {
            settled = true;
            break;
        }
    }
    handle.shutdown().await;

    assert!(settled, "worker did not deliver the retry");
    assert_eq!(engine.transport.sent().len(), 2);
}

// ============================================================================
// Counters and fan-out
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deliveries_keep_exact_counters() {
    let replies = (0..40).map(|i| {
        if i % 4 == 0 {
            Reply::Status(400)
        } else {
            Reply::Slow(Duration::from_millis(2))
        }
    });
    let mut config = EngineConfig::default();
    config.retry.auto_disable_after = 0;
    let engine = engine(&config, replies);
    let (id, _) = register(&engine.service, "https://x.test/hook");
    let service = Arc::new(engine.service.clone());

    let mut tasks = Vec::new();
    for _ in 0..40 {
        let service = Arc::clone(&service);
        let id = id.clone();
        tasks.push(tokio::spawn(async move {
            service.deliver_event(&id, &invoice_event()).await.unwrap()
        }));
    }
    let mut succeeded = 0;
    for task in tasks {
        if task.await.unwrap().success {
            succeeded += 1;
        }
    }

    let stats = engine.service.endpoint_stats(&id).unwrap();
    assert_eq!(stats.delivery_count, 40);
    assert_eq!(stats.success_count, succeeded);
    assert_eq!(stats.success_count + stats.failure_count, 40);
    assert_eq!(stats.attempts.total, 40);
}

#[tokio::test]
async fn test_publish_reaches_only_subscribed_endpoints() {
    let engine = engine(&EngineConfig::default(), []);
    register(&engine.service, "https://a.test/hook");
    register(&engine.service, "https://b.test/hook");
    engine
        .service
        .create_webhook(NewEndpoint::new("https://c.test/hook").with_events(["payment.failed"]))
        .unwrap();

    let fan_out = engine.service.publish(&invoice_event()).unwrap();
    assert_eq!(fan_out.len(), 2);
    fan_out.join().await;

    let mut urls: Vec<_> = engine.transport.sent().into_iter().map(|r| r.url).collect();
    urls.sort();
    assert_eq!(urls, ["https://a.test/hook", "https://b.test/hook"]);
}

#[tokio::test]
async fn test_test_webhook_leaves_no_history() {
    let engine = engine(&EngineConfig::default(), [Reply::Status(204)]);
    let (id, _) = register(&engine.service, "https://x.test/hook");

    let result = engine.service.test_webhook(&id, None).await.unwrap();
    assert!(result.success);
    assert_eq!(result.status_code, Some(204));

    assert!(engine.service.endpoint_history(&id, 10).unwrap().is_empty());
    assert_eq!(engine.service.get_webhook(&id).unwrap().delivery_count, 0);
    assert_eq!(engine.transport.sent()[0].event_type, "webhook.test");
}
