//! Storage collaborator traits.
//!
//! The engine needs only single-row CRUD from its persistence layer. Each
//! write touches one row keyed by ID, so no cross-row transactions are needed
//! for correctness. Counter columns are bumped in place (`col = col + 1`),
//! never read-modify-written, so concurrent deliveries to the same endpoint
//! keep them exact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::models::{
    AttemptId, AttemptStatus, DeliveryAttempt, DeliveryId, EndpointFilter, EndpointId,
    WebhookEndpoint,
};

/// Storage for webhook endpoint configuration.
pub trait EndpointStore: Send + Sync {
    /// Inserts a new endpoint.
    fn insert_endpoint(&self, endpoint: &WebhookEndpoint) -> Result<()>;

    /// Retrieves an endpoint by ID.
    fn get_endpoint(&self, id: &EndpointId) -> Result<Option<WebhookEndpoint>>;

    /// Lists endpoints matching a filter, oldest first.
    fn list_endpoints(&self, filter: &EndpointFilter) -> Result<Vec<WebhookEndpoint>>;

    /// Writes the configuration fields of an endpoint (URL, secret, events,
    /// description, metadata, retry overrides, `updated_at`).
    ///
    /// Counters and the active flag are not touched. Returns `false` if the
    /// endpoint does not exist.
    fn update_endpoint(&self, endpoint: &WebhookEndpoint) -> Result<bool>;

    /// Flips the active flag. Returns `false` if the endpoint does not exist.
    fn set_active(&self, id: &EndpointId, active: bool, at: DateTime<Utc>) -> Result<bool>;

    /// Atomically applies the counters for one completed attempt.
    ///
    /// Returns the endpoint's consecutive terminal failure count after the
    /// update, or `None` if the endpoint does not exist.
    fn record_outcome(
        &self,
        id: &EndpointId,
        status: AttemptStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<u32>>;
}

/// Storage for delivery attempts.
pub trait AttemptStore: Send + Sync {
    /// Inserts or replaces an attempt keyed by its ID.
    ///
    /// Inserting a second attempt with an existing
    /// `(delivery_id, attempt_number)` pair fails with
    /// [`Error::InvalidState`](crate::Error::InvalidState): another writer
    /// already created that attempt.
    fn upsert_attempt(&self, attempt: &DeliveryAttempt) -> Result<()>;

    /// Moves an attempt from `pending` to `sending`.
    ///
    /// Returns `false` if the attempt was not pending (already claimed by
    /// someone else, or completed).
    fn claim_attempt(&self, id: &AttemptId, at: DateTime<Utc>) -> Result<bool>;

    /// Writes the mutable fields of an attempt only if its stored status is
    /// still `expected`.
    ///
    /// Returns `false` when another writer moved the attempt first; the
    /// caller no longer owns it and must not act on its outcome.
    fn transition(&self, attempt: &DeliveryAttempt, expected: AttemptStatus) -> Result<bool>;

    /// Retrieves an attempt by ID.
    fn get_attempt(&self, id: &AttemptId) -> Result<Option<DeliveryAttempt>>;

    /// Returns the attempt with the highest attempt number for a delivery.
    fn latest_attempt(&self, delivery_id: &DeliveryId) -> Result<Option<DeliveryAttempt>>;

    /// Returns all attempts of a delivery ordered by attempt number.
    fn delivery_attempts(&self, delivery_id: &DeliveryId) -> Result<Vec<DeliveryAttempt>>;

    /// Returns the most recent attempts against an endpoint, newest first.
    fn endpoint_attempts(&self, endpoint_id: &EndpointId, limit: usize)
    -> Result<Vec<DeliveryAttempt>>;

    /// Returns pending attempts whose `scheduled_at` is at or before `now`.
    fn due_attempts(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DeliveryAttempt>>;

    /// Returns attempts stuck in `sending` since before `cutoff`.
    fn stale_attempts(&self, cutoff: DateTime<Utc>, limit: usize)
    -> Result<Vec<DeliveryAttempt>>;

    /// Returns `failed_retryable` attempts completed before `cutoff` that
    /// are still the latest attempt of their delivery.
    ///
    /// These are deliveries whose follow-up attempt was never stored.
    fn orphaned_retries(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DeliveryAttempt>>;

    /// Aggregates attempt outcomes for an endpoint.
    fn endpoint_stats(&self, endpoint_id: &EndpointId) -> Result<AttemptStats>;

    /// Deletes the attempt logs of finished deliveries last touched before `cutoff`.
    ///
    /// Deliveries with a pending or in-flight attempt are never purged.
    /// Returns the number of attempt rows deleted.
    fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Attempt statistics for an endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptStats {
    /// Total number of attempts.
    pub total: usize,
    /// Attempts that succeeded.
    pub succeeded: usize,
    /// Attempts that failed (any failure status).
    pub failed: usize,
    /// Attempts waiting to run or in flight.
    pub pending: usize,
    /// Deliveries that ended `exhausted`.
    pub exhausted: usize,
    /// Average response time of completed attempts in milliseconds.
    pub avg_response_time_ms: f64,
}

impl AttemptStats {
    /// Percentage of completed attempts that succeeded.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        let completed = self.succeeded + self.failed;
        if completed == 0 {
            return 0.0;
        }
        (self.succeeded as f64 / completed as f64) * 100.0
    }
}
