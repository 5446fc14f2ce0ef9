//! Webhook CLI commands.
//!
//! Thin wrappers over [`WebhookService`] that print results as a table or
//! as JSON. Commands whose outcome can be negative (delivery, test, retry,
//! verify) return whether it succeeded so the binary can set its exit code.

// CLI commands are allowed to use println! for output
#![allow(clippy::print_stdout)]

use std::time::Duration;

use serde::Serialize;

use crate::models::{
    DeliveryAttempt, DeliveryId, EndpointFilter, EndpointId, Event, NewEndpoint, WebhookEndpoint,
};
use crate::webhooks::{TickReport, WebhookService};
use crate::{Error, Result};

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table.
    #[default]
    Table,
    /// Pretty-printed JSON.
    Json,
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| Error::OperationFailed {
        operation: "serialize_output".to_string(),
        cause: e.to_string(),
    })?;
    println!("{json}");
    Ok(())
}

/// Registers an endpoint and prints its ID and secret.
///
/// # Errors
///
/// Returns an error if registration is refused or storage fails.
pub fn cmd_webhook_create(
    service: &WebhookService,
    url: &str,
    events: Vec<String>,
    description: Option<String>,
    secret: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let mut data = NewEndpoint::new(url).with_events(events);
    if let Some(description) = description {
        data = data.with_description(description);
    }
    if let Some(secret) = secret {
        data = data.with_secret(secret);
    }

    let result = service.create_webhook(data)?;
    if format == OutputFormat::Json {
        print_json(&result)?;
    } else if result.success {
        println!("Webhook created:");
        println!("  ID:     {}", result.webhook_id.as_ref().map_or("", EndpointId::as_str));
        println!("  Secret: {}", result.secret.as_deref().unwrap_or(""));
        println!();
        println!("Store the secret now; it will not be shown again.");
    }

    match result.error {
        Some(error) => Err(Error::InvalidInput(error)),
        None => Ok(()),
    }
}

/// Lists endpoints.
///
/// # Errors
///
/// Returns an error if storage fails.
pub fn cmd_webhook_list(
    service: &WebhookService,
    include_disabled: bool,
    format: OutputFormat,
) -> Result<()> {
    let filter = if include_disabled {
        EndpointFilter::default()
    } else {
        EndpointFilter::active()
    };
    let endpoints = service.list_webhooks(&filter)?;

    if format == OutputFormat::Json {
        return print_json(&endpoints);
    }
    if endpoints.is_empty() {
        println!("No webhooks registered.");
        println!();
        println!("Register one with: webhook-engine create <URL> --events invoice.created");
        return Ok(());
    }

    println!("{}", "-".repeat(100));
    println!(
        "{:<38} {:<8} {:<30} {:<22}",
        "ID", "ACTIVE", "URL", "EVENTS"
    );
    println!("{}", "-".repeat(100));
    for endpoint in &endpoints {
        println!(
            "{:<38} {:<8} {:<30} {:<22}",
            endpoint.id,
            if endpoint.active { "Yes" } else { "No" },
            truncate(&endpoint.url, 28),
            truncate(&events_label(endpoint), 20),
        );
    }
    println!("{}", "-".repeat(100));
    println!("Total: {} webhook(s)", endpoints.len());
    Ok(())
}

/// Prints one endpoint.
///
/// # Errors
///
/// Returns an error for unknown IDs or storage failures.
pub fn cmd_webhook_show(service: &WebhookService, id: &str, format: OutputFormat) -> Result<()> {
    let endpoint = service.get_webhook(&EndpointId::new(id))?;
    if format == OutputFormat::Json {
        return print_json(&endpoint);
    }

    println!("Webhook {}", endpoint.id);
    println!("  URL:                  {}", endpoint.url);
    println!("  Active:               {}", endpoint.active);
    println!("  Events:               {}", events_label(&endpoint));
    if let Some(description) = &endpoint.description {
        println!("  Description:          {description}");
    }
    println!("  Deliveries:           {}", endpoint.delivery_count);
    println!("  Succeeded:            {}", endpoint.success_count);
    println!("  Failed:               {}", endpoint.failure_count);
    println!("  Consecutive failures: {}", endpoint.consecutive_failures);
    if let Some(at) = endpoint.last_delivery_at {
        println!("  Last delivery:        {}", at.to_rfc3339());
    }
    if let Some(at) = endpoint.disabled_at {
        println!("  Disabled at:          {}", at.to_rfc3339());
    }
    println!("  Created:              {}", endpoint.created_at.to_rfc3339());
    Ok(())
}

/// Disables or re-enables an endpoint.
///
/// # Errors
///
/// Returns an error for unknown IDs or storage failures.
pub fn cmd_webhook_set_active(service: &WebhookService, id: &str, active: bool) -> Result<()> {
    let id = EndpointId::new(id);
    if active {
        service.enable_webhook(&id)?;
        println!("Webhook {id} enabled.");
    } else {
        service.disable_webhook(&id)?;
        println!("Webhook {id} disabled. Pending retries will be cancelled.");
    }
    Ok(())
}

/// Rotates an endpoint's secret and prints the new one.
///
/// # Errors
///
/// Returns an error for unknown IDs or storage failures.
pub fn cmd_webhook_rotate_secret(service: &WebhookService, id: &str) -> Result<()> {
    let secret = service.rotate_secret(&EndpointId::new(id))?;
    println!("New secret: {secret}");
    println!("Deliveries are signed with the new secret from now on.");
    Ok(())
}

/// Delivers one event to an endpoint.
///
/// # Errors
///
/// Returns an error if storage fails.
pub async fn cmd_webhook_deliver(
    service: &WebhookService,
    id: &str,
    event: Event,
    format: OutputFormat,
) -> Result<bool> {
    let result = service.deliver_event(&EndpointId::new(id), &event).await?;
    if format == OutputFormat::Json {
        print_json(&result)?;
        return Ok(result.success);
    }

    if let Some(delivery_id) = &result.delivery_id {
        println!("Delivery: {delivery_id}");
    }
    if result.success {
        println!("Delivered.");
    } else {
        println!("Failed: {}", result.error.as_deref().unwrap_or("unknown error"));
        if result.retryable {
            println!("A retry has been scheduled; run `webhook-engine worker` to process it.");
        }
    }
    Ok(result.success)
}

/// Sends a test event to an endpoint.
///
/// # Errors
///
/// Returns an error if storage fails.
pub async fn cmd_webhook_test(
    service: &WebhookService,
    id: &str,
    format: OutputFormat,
) -> Result<bool> {
    println!("Testing webhook '{id}'...");
    let result = service.test_webhook(&EndpointId::new(id), None).await?;
    if format == OutputFormat::Json {
        print_json(&result)?;
        return Ok(result.success);
    }

    let status = result
        .status_code
        .map_or_else(|| "-".to_string(), |code| code.to_string());
    if result.success {
        println!("Success: HTTP {status} in {}ms", result.response_time);
    } else {
        println!(
            "Failed after {}ms: {}",
            result.response_time,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(result.success)
}

/// Retries a delivery immediately.
///
/// # Errors
///
/// Returns an error if storage fails.
pub async fn cmd_webhook_retry(
    service: &WebhookService,
    delivery_id: &str,
    format: OutputFormat,
) -> Result<bool> {
    let result = service.retry_delivery(&DeliveryId::new(delivery_id)).await?;
    if format == OutputFormat::Json {
        print_json(&result)?;
        return Ok(result.success);
    }

    match (result.success, result.attempt_number) {
        (true, Some(n)) => println!("Attempt {n} succeeded."),
        (_, Some(n)) => println!(
            "Attempt {n} failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        ),
        (_, None) => println!(
            "Not retried: {}",
            result.error.as_deref().unwrap_or("unknown error")
        ),
    }
    Ok(result.success)
}

/// Prints the attempt log of a delivery or of an endpoint.
///
/// # Errors
///
/// Returns an error if neither target is given, the target is unknown, or
/// storage fails.
pub fn cmd_webhook_history(
    service: &WebhookService,
    delivery_id: Option<&str>,
    endpoint_id: Option<&str>,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let attempts = match (delivery_id, endpoint_id) {
        (Some(delivery), _) => service.delivery_history(&DeliveryId::new(delivery))?,
        (None, Some(endpoint)) => service.endpoint_history(&EndpointId::new(endpoint), limit)?,
        (None, None) => {
            return Err(Error::InvalidInput(
                "Specify --delivery or --endpoint".to_string(),
            ));
        },
    };

    if format == OutputFormat::Json {
        return print_json(&attempts);
    }
    if attempts.is_empty() {
        println!("No delivery attempts found.");
        return Ok(());
    }

    println!("{}", "-".repeat(110));
    println!(
        "{:<38} {:<4} {:<17} {:<6} {:<8} {:<30}",
        "DELIVERY", "#", "STATUS", "HTTP", "MS", "WHEN"
    );
    println!("{}", "-".repeat(110));
    for attempt in &attempts {
        print_attempt_row(attempt);
    }
    println!("{}", "-".repeat(110));
    println!("Total: {} attempt(s)", attempts.len());
    Ok(())
}

fn print_attempt_row(attempt: &DeliveryAttempt) {
    let when = attempt.completed_at.unwrap_or(attempt.scheduled_at);
    println!(
        "{:<38} {:<4} {:<17} {:<6} {:<8} {:<30}",
        attempt.delivery_id,
        attempt.attempt_number,
        attempt.status,
        attempt
            .response_status_code
            .map_or_else(|| "-".to_string(), |code| code.to_string()),
        attempt
            .response_time_ms
            .map_or_else(|| "-".to_string(), |ms| ms.to_string()),
        when.format("%Y-%m-%d %H:%M:%S UTC"),
    );
    if let Some(error) = &attempt.error_message {
        println!("    {}", truncate(error, 100));
    }
}

/// Prints delivery statistics for an endpoint.
///
/// # Errors
///
/// Returns an error for unknown IDs or storage failures.
pub fn cmd_webhook_stats(service: &WebhookService, id: &str, format: OutputFormat) -> Result<()> {
    let stats = service.endpoint_stats(&EndpointId::new(id))?;
    if format == OutputFormat::Json {
        return print_json(&stats);
    }

    println!("Webhook {}", stats.endpoint_id);
    println!("{}", "-".repeat(40));
    println!("Active:               {}", stats.active);
    println!("Deliveries:           {}", stats.delivery_count);
    println!("Succeeded:            {}", stats.success_count);
    println!("Failed:               {}", stats.failure_count);
    println!("Consecutive failures: {}", stats.consecutive_failures);
    println!();
    println!("Retained attempts:    {}", stats.attempts.total);
    println!("  Pending:            {}", stats.attempts.pending);
    println!("  Exhausted:          {}", stats.attempts.exhausted);
    println!("Success rate:         {:.1}%", stats.attempts.success_rate());
    println!("Avg response time:    {:.0}ms", stats.attempts.avg_response_time_ms);
    Ok(())
}

/// Deletes finished delivery history older than `older_than_days`.
///
/// # Errors
///
/// Returns an error if storage fails.
pub fn cmd_webhook_purge(service: &WebhookService, older_than_days: u64) -> Result<()> {
    let older_than = Duration::from_secs(older_than_days.saturating_mul(24 * 60 * 60));
    let removed = service.purge_history(older_than)?;
    println!("Purged {removed} attempt(s) older than {older_than_days} day(s).");
    Ok(())
}

/// Prints the signature of a payload.
pub fn cmd_webhook_sign(service: &WebhookService, payload: &[u8], secret: &str) {
    println!("{}", service.generate_signature(payload, secret));
}

/// Checks a payload signature and prints the verdict.
pub fn cmd_webhook_verify(
    service: &WebhookService,
    payload: &[u8],
    signature: &str,
    secret: &str,
) -> bool {
    let valid = service.verify_signature(payload, signature, secret);
    println!("{}", if valid { "valid" } else { "invalid" });
    valid
}

/// Prints a worker tick summary.
pub fn print_tick_report(report: &TickReport) {
    println!(
        "Recovered: {}  Rescheduled: {}  Claimed: {}  Succeeded: {}  Failed: {}  Cancelled: {}",
        report.recovered,
        report.rescheduled,
        report.claimed,
        report.succeeded,
        report.failed,
        report.cancelled
    );
}

fn events_label(endpoint: &WebhookEndpoint) -> String {
    if endpoint.events.is_empty() {
        "*".to_string()
    } else {
        endpoint.events.join(", ")
    }
}

/// Truncates a string for table display.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
