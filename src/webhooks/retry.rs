//! Retry policy and scheduling.
//!
//! # Backoff
//!
//! The delay before attempt `n + 1` is `min(base_delay * 2^n, max_delay)`,
//! spread by ±`jitter` (20% by default) and clamped back into
//! `[base_delay, max_delay]`. With the defaults (1s base, 10m ceiling,
//! 3 attempts) a failing delivery is retried after roughly 2s and 4s.
//!
//! # Dead-lettering
//!
//! A retryable failure on the last allowed attempt is recorded as
//! `exhausted` and nothing further is scheduled. Terminal failures
//! (`failed_permanent`, `exhausted`) count towards the endpoint's
//! consecutive-failure streak; once the streak reaches the configured
//! threshold the endpoint is disabled.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::dispatcher::DeliveryFailure;
use crate::models::{AttemptStatus, DeliveryAttempt, DeliveryId, EndpointRetry, WebhookEndpoint};
use crate::storage::{AttemptStore, EndpointStore};
use crate::{Error, Result};

/// Retry configuration for webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per delivery, including the first (default: 3).
    pub max_attempts: u32,

    /// Base delay in milliseconds for exponential backoff (default: 1000).
    pub base_delay_ms: u64,

    /// Backoff ceiling in milliseconds (default: 600000).
    pub max_delay_ms: u64,

    /// Relative jitter applied to each delay (default: 0.2).
    pub jitter: f64,

    /// Consecutive terminal failures that disable an endpoint (default: 5, 0 = never).
    pub auto_disable_after: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 600_000,
            jitter: 0.2,
            auto_disable_after: 5,
        }
    }
}

/// Effective retry policy for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum attempts per delivery, including the first.
    pub max_attempts: u32,
    /// Base backoff delay.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Relative jitter in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Builds the engine-wide policy.
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
        .normalized()
    }

    /// Applies endpoint overrides on top of this policy.
    #[must_use]
    pub fn with_overrides(&self, overrides: &EndpointRetry) -> Self {
        Self {
            max_attempts: overrides.max_attempts.unwrap_or(self.max_attempts),
            base_delay: overrides
                .base_delay_ms
                .map_or(self.base_delay, Duration::from_millis),
            max_delay: overrides
                .max_delay_ms
                .map_or(self.max_delay, Duration::from_millis),
            jitter: self.jitter,
        }
        .normalized()
    }

    fn normalized(mut self) -> Self {
        self.max_attempts = self.max_attempts.max(1);
        self.max_delay = self.max_delay.max(self.base_delay);
        self.jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Delay before the attempt following attempt `completed`.
    ///
    /// `sample` is a uniform draw from `[0, 1)`; `0.5` yields the un-jittered delay.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn backoff(&self, completed: u32, sample: f64) -> Duration {
        let base = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);

        let factor = 1_u64.checked_shl(completed).unwrap_or(u64::MAX);
        let raw = base.saturating_mul(factor).min(max);

        let spread = sample.clamp(0.0, 1.0).mul_add(2.0, -1.0) * self.jitter;
        let jittered = (raw as f64 * (1.0 + spread)).round();
        let clamped = jittered.clamp(base as f64, max as f64);

        Duration::from_millis(clamped as u64)
    }

    /// Delay before the attempt following attempt `completed`, with random jitter.
    #[must_use]
    pub fn next_delay(&self, completed: u32) -> Duration {
        self.backoff(completed, jitter_sample())
    }
}

/// Uniform sample from `[0, 1)`.
#[allow(clippy::cast_precision_loss)]
fn jitter_sample() -> f64 {
    let bits = rand::rng().next_u64() >> 11;
    bits as f64 / (1_u64 << 53) as f64
}

/// What happened after an attempt was settled.
#[derive(Debug, Clone, Default)]
pub struct FollowUp {
    /// Attempt scheduled to retry the delivery.
    pub next_attempt: Option<DeliveryAttempt>,
    /// Whether the endpoint was disabled by this outcome.
    pub endpoint_disabled: bool,
}

/// Decides what happens to a delivery after each attempt.
///
/// Scheduling only computes when the next attempt is due and persists it as
/// `pending`; sending it is left to whoever claims it.
pub struct RetryScheduler {
    endpoints: Arc<dyn EndpointStore>,
    attempts: Arc<dyn AttemptStore>,
    policy: RetryPolicy,
    auto_disable_after: u32,
}

impl RetryScheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(
        endpoints: Arc<dyn EndpointStore>,
        attempts: Arc<dyn AttemptStore>,
        config: &RetryConfig,
    ) -> Self {
        Self {
            endpoints,
            attempts,
            policy: RetryPolicy::from_config(config),
            auto_disable_after: config.auto_disable_after,
        }
    }

    /// Engine-wide policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Policy for an endpoint, with its overrides applied.
    #[must_use]
    pub fn policy_for(&self, endpoint: &WebhookEndpoint) -> RetryPolicy {
        self.policy.with_overrides(&endpoint.retry)
    }

    /// Status an attempt ends in, given its failure (if any).
    #[must_use]
    pub fn settle(attempt: &DeliveryAttempt, failure: Option<&DeliveryFailure>) -> AttemptStatus {
        match failure {
            None => AttemptStatus::Succeeded,
            Some(DeliveryFailure::Permanent(_)) => AttemptStatus::FailedPermanent,
            Some(DeliveryFailure::Transient(_)) if attempt.is_last_allowed() => {
                AttemptStatus::Exhausted
            },
            Some(DeliveryFailure::Transient(_)) => AttemptStatus::FailedRetryable,
        }
    }

    /// Acts on a recorded attempt: schedules the retry, dead-letters, or
    /// disables the endpoint.
    ///
    /// `consecutive_failures` is the endpoint's streak after this attempt's
    /// counters were applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the retry or the endpoint flag cannot be persisted.
    pub fn after_attempt(
        &self,
        endpoint: Option<&WebhookEndpoint>,
        attempt: &DeliveryAttempt,
        consecutive_failures: Option<u32>,
    ) -> Result<FollowUp> {
        let mut follow_up = FollowUp::default();

        match attempt.status {
            AttemptStatus::FailedRetryable => {
                follow_up.next_attempt = Some(self.schedule_next(endpoint, attempt)?);
            },
            AttemptStatus::Exhausted => {
                metrics::counter!("webhook_deliveries_exhausted_total").increment(1);
                tracing::warn!(
                    delivery_id = %attempt.delivery_id,
                    endpoint_id = %attempt.endpoint_id,
                    attempts = attempt.attempt_number,
                    error = attempt.error_message.as_deref().unwrap_or(""),
                    "Delivery exhausted its retries"
                );
            },
            _ => {},
        }

        if let (Some(endpoint), Some(streak)) = (endpoint, consecutive_failures) {
            follow_up.endpoint_disabled = self.maybe_disable(endpoint, attempt, streak)?;
        }

        Ok(follow_up)
    }

    /// Persists the next attempt of a delivery, due after the backoff delay.
    ///
    /// # Errors
    ///
    /// Returns an error if the attempt cannot be stored.
    pub fn schedule_next(
        &self,
        endpoint: Option<&WebhookEndpoint>,
        attempt: &DeliveryAttempt,
    ) -> Result<DeliveryAttempt> {
        let policy = endpoint.map_or(self.policy, |ep| self.policy_for(ep));
        let delay = policy.next_delay(attempt.attempt_number);
        let from = attempt.completed_at.unwrap_or_else(Utc::now);
        let next = attempt.next(offset(from, delay));

        self.attempts.upsert_attempt(&next)?;

        metrics::counter!("webhook_retries_scheduled_total").increment(1);
        tracing::debug!(
            delivery_id = %next.delivery_id,
            endpoint_id = %next.endpoint_id,
            attempt_number = next.attempt_number,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduled webhook retry"
        );

        Ok(next)
    }

    /// Re-arms a delivery for an immediate manual retry.
    ///
    /// The returned attempt is already stored as `sending` and belongs to
    /// the caller, who must execute it.
    ///
    /// | Latest attempt | Result |
    /// |----------------|--------|
    /// | `failed_retryable` | New attempt `n + 1`, due now |
    /// | `pending` | Same attempt, expedited to now |
    /// | `sending` | `InvalidState` (in flight) |
    /// | terminal | `InvalidState`, nothing created |
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown delivery and
    /// [`Error::InvalidState`] when the delivery cannot be retried.
    pub fn rearm(&self, delivery_id: &DeliveryId, now: DateTime<Utc>) -> Result<DeliveryAttempt> {
        let latest = self
            .attempts
            .latest_attempt(delivery_id)?
            .ok_or_else(|| Error::NotFound {
                kind: "delivery",
                id: delivery_id.to_string(),
            })?;

        match latest.status {
            AttemptStatus::FailedRetryable => {
                let mut next = latest.next(now);
                next.status = AttemptStatus::Sending;
                next.sent_at = Some(now);
                match self.attempts.upsert_attempt(&next) {
                    Ok(()) => Ok(next),
                    // A concurrent retry created attempt n + 1 first.
                    Err(Error::InvalidState(_)) => Err(in_flight(delivery_id)),
                    Err(e) => Err(e),
                }
            },
            AttemptStatus::Pending => {
                let mut expedited = latest;
                expedited.scheduled_at = now;
                expedited.status = AttemptStatus::Sending;
                expedited.sent_at = Some(now);
                if self
                    .attempts
                    .transition(&expedited, AttemptStatus::Pending)?
                {
                    Ok(expedited)
                } else {
                    Err(in_flight(delivery_id))
                }
            },
            AttemptStatus::Sending => Err(in_flight(delivery_id)),
            status => Err(Error::InvalidState(format!(
                "Delivery {delivery_id} is {status} and cannot be retried"
            ))),
        }
    }

    fn maybe_disable(
        &self,
        endpoint: &WebhookEndpoint,
        attempt: &DeliveryAttempt,
        streak: u32,
    ) -> Result<bool> {
        if self.auto_disable_after == 0
            || streak < self.auto_disable_after
            || !matches!(
                attempt.status,
                AttemptStatus::FailedPermanent | AttemptStatus::Exhausted
            )
        {
            return Ok(false);
        }

        let disabled = self.endpoints.set_active(&endpoint.id, false, Utc::now())?;
        if disabled {
            metrics::counter!("webhook_endpoints_auto_disabled_total").increment(1);
            tracing::warn!(
                endpoint_id = %endpoint.id,
                url = %endpoint.url,
                consecutive_failures = streak,
                "Webhook endpoint disabled after consecutive delivery failures"
            );
        }
        Ok(disabled)
    }
}

fn in_flight(delivery_id: &DeliveryId) -> Error {
    Error::InvalidState(format!("Delivery {delivery_id} is already in flight"))
}

fn offset(from: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| from.checked_add_signed(delta))
        .unwrap_or(from)
}
