//! Delivery attempt records.
//!
//! One record exists per HTTP try. The row moves through
//! `pending -> sending -> {succeeded | failed_retryable | failed_permanent}`;
//! a `failed_retryable` row whose delivery has used its budget is closed as
//! `exhausted` instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{AttemptId, DeliveryId, EndpointId};
use crate::Error;

/// Status of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Scheduled, waiting for its `scheduled_at`.
    Pending,
    /// Claimed by a dispatcher, request in flight.
    Sending,
    /// Subscriber answered 2xx.
    Succeeded,
    /// Failed in a way that may succeed later (timeout, 5xx, 408, 429).
    FailedRetryable,
    /// Rejected by the subscriber (4xx); will not be retried.
    FailedPermanent,
    /// Retryable failure on the last allowed attempt.
    Exhausted,
}

impl AttemptStatus {
    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Succeeded => "succeeded",
            Self::FailedRetryable => "failed_retryable",
            Self::FailedPermanent => "failed_permanent",
            Self::Exhausted => "exhausted",
        }
    }

    /// Whether the delivery this attempt belongs to is finished for good.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::FailedPermanent | Self::Exhausted
        )
    }

    /// Whether the attempt has completed (successfully or not).
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        !matches!(self, Self::Pending | Self::Sending)
    }

    /// Whether this outcome counts as a failed attempt.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::FailedRetryable | Self::FailedPermanent | Self::Exhausted
        )
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "sending" => Ok(Self::Sending),
            "succeeded" => Ok(Self::Succeeded),
            "failed_retryable" => Ok(Self::FailedRetryable),
            "failed_permanent" => Ok(Self::FailedPermanent),
            "exhausted" => Ok(Self::Exhausted),
            _ => Err(Error::InvalidInput(format!("Invalid attempt status: {s}"))),
        }
    }
}

/// A single HTTP try within a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// Unique attempt ID.
    pub id: AttemptId,
    /// Logical delivery this attempt belongs to.
    pub delivery_id: DeliveryId,
    /// Target endpoint.
    pub endpoint_id: EndpointId,
    /// Event type being delivered.
    pub event_type: String,
    /// Canonical JSON body; every attempt of a delivery sends the same bytes.
    pub payload: String,
    /// Signature header value sent with this attempt.
    pub signature: Option<String>,
    /// 1-based attempt number.
    pub attempt_number: u32,
    /// Attempt budget for the delivery.
    pub max_attempts: u32,
    /// Current status.
    pub status: AttemptStatus,
    /// HTTP status returned by the subscriber.
    pub response_status_code: Option<u16>,
    /// Round-trip time of the request.
    pub response_time_ms: Option<u64>,
    /// Failure description.
    pub error_message: Option<String>,
    /// Earliest time the attempt may run.
    pub scheduled_at: DateTime<Utc>,
    /// When the request was sent.
    pub sent_at: Option<DateTime<Utc>>,
    /// When the outcome was recorded.
    pub completed_at: Option<DateTime<Utc>>,
}

impl DeliveryAttempt {
    /// Creates the first attempt of a new delivery, due immediately.
    #[must_use]
    pub fn first(
        endpoint_id: EndpointId,
        event_type: impl Into<String>,
        payload: String,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AttemptId::generate(),
            delivery_id: DeliveryId::generate(),
            endpoint_id,
            event_type: event_type.into(),
            payload,
            signature: None,
            attempt_number: 1,
            max_attempts: max_attempts.max(1),
            status: AttemptStatus::Pending,
            response_status_code: None,
            response_time_ms: None,
            error_message: None,
            scheduled_at: now,
            sent_at: None,
            completed_at: None,
        }
    }

    /// Creates the follow-up attempt of the same delivery, scheduled at `at`.
    #[must_use]
    pub fn next(&self, at: DateTime<Utc>) -> Self {
        Self {
            id: AttemptId::generate(),
            delivery_id: self.delivery_id.clone(),
            endpoint_id: self.endpoint_id.clone(),
            event_type: self.event_type.clone(),
            payload: self.payload.clone(),
            signature: None,
            attempt_number: self.attempt_number + 1,
            max_attempts: self.max_attempts,
            status: AttemptStatus::Pending,
            response_status_code: None,
            response_time_ms: None,
            error_message: None,
            scheduled_at: at,
            sent_at: None,
            completed_at: None,
        }
    }

    /// Whether this is the last attempt the delivery's budget allows.
    #[must_use]
    pub const fn is_last_allowed(&self) -> bool {
        self.attempt_number >= self.max_attempts
    }

    /// Payload bytes as sent on the wire.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        self.payload.as_bytes()
    }
}
