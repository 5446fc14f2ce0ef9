//! Bulkheads for outbound deliveries.
//!
//! Every send holds two permits: one from its endpoint's semaphore and one
//! from the global semaphore. A slow subscriber can therefore tie up at most
//! `per_endpoint` requests, and the process never has more than `global`
//! requests in flight. Excess sends wait for a permit.
//!
//! The endpoint permit is taken first, so sends queued behind a slow
//! endpoint do not hold global capacity while they wait.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::models::EndpointId;
use crate::{Error, Result};

/// Configuration for the delivery bulkheads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadConfig {
    /// Maximum in-flight requests per endpoint.
    ///
    /// Default: 4.
    pub per_endpoint: usize,

    /// Maximum in-flight requests across all endpoints.
    ///
    /// Default: 64.
    pub global: usize,

    /// Timeout for acquiring both permits in milliseconds (0 = wait indefinitely).
    ///
    /// Default: 30000ms.
    pub acquire_timeout_ms: u64,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BulkheadConfig {
    /// Creates the default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            per_endpoint: 4,
            global: 64,
            acquire_timeout_ms: 30_000,
        }
    }

    /// Sets the per-endpoint limit.
    #[must_use]
    pub const fn with_per_endpoint(mut self, max: usize) -> Self {
        self.per_endpoint = max;
        self
    }

    /// Sets the global limit.
    #[must_use]
    pub const fn with_global(mut self, max: usize) -> Self {
        self.global = max;
        self
    }

    /// Sets the acquire timeout in milliseconds.
    #[must_use]
    pub const fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = timeout_ms;
        self
    }
}

/// Permits held for the duration of one send.
#[derive(Debug)]
pub struct BulkheadPermit {
    _endpoint: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

/// Per-endpoint and global concurrency limits.
pub struct DeliveryBulkhead {
    config: BulkheadConfig,
    global: Arc<Semaphore>,
    endpoints: Mutex<HashMap<EndpointId, Arc<Semaphore>>>,
}

impl DeliveryBulkhead {
    /// Creates the bulkheads.
    #[must_use]
    pub fn new(config: BulkheadConfig) -> Self {
        Self {
            config,
            global: Arc::new(Semaphore::new(config.global.max(1))),
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &BulkheadConfig {
        &self.config
    }

    /// Global permits currently available.
    #[must_use]
    pub fn available_global(&self) -> usize {
        self.global.available_permits()
    }

    /// Permits currently available for an endpoint.
    #[must_use]
    pub fn available_for(&self, endpoint_id: &EndpointId) -> usize {
        self.endpoint_semaphore(endpoint_id).available_permits()
    }

    /// Waits for an endpoint permit, then a global permit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the permits are not obtained
    /// within the configured timeout.
    #[allow(clippy::cast_precision_loss)]
    pub async fn acquire(&self, endpoint_id: &EndpointId) -> Result<BulkheadPermit> {
        let start = Instant::now();
        let endpoint = self.endpoint_semaphore(endpoint_id);

        let permits = async {
            let endpoint_permit = endpoint.acquire_owned().await;
            let global_permit = Arc::clone(&self.global).acquire_owned().await;
            (endpoint_permit, global_permit)
        };

        let (endpoint_permit, global_permit) = if self.config.acquire_timeout_ms == 0 {
            permits.await
        } else {
            let timeout = Duration::from_millis(self.config.acquire_timeout_ms);
            tokio::time::timeout(timeout, permits).await.map_err(|_| {
                metrics::counter!("webhook_bulkhead_rejections_total", "reason" => "timeout")
                    .increment(1);
                Error::OperationFailed {
                    operation: "delivery_bulkhead_acquire".to_string(),
                    cause: format!(
                        "Delivery bulkhead acquire timed out after {}ms",
                        self.config.acquire_timeout_ms
                    ),
                }
            })?
        };

        // Semaphores are never closed, so acquisition only fails if that changes.
        let (Ok(endpoint_permit), Ok(global_permit)) = (endpoint_permit, global_permit) else {
            return Err(Error::OperationFailed {
                operation: "delivery_bulkhead_acquire".to_string(),
                cause: "Delivery bulkhead closed".to_string(),
            });
        };

        let waited_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        metrics::histogram!("webhook_bulkhead_wait_ms").record(waited_ms as f64);
        metrics::gauge!("webhook_bulkhead_available_permits", "scope" => "global")
            .set(self.global.available_permits() as f64);

        tracing::trace!(
            endpoint_id = %endpoint_id,
            waited_ms,
            "Acquired delivery bulkhead permits"
        );

        Ok(BulkheadPermit {
            _endpoint: endpoint_permit,
            _global: global_permit,
        })
    }

    fn endpoint_semaphore(&self, endpoint_id: &EndpointId) -> Arc<Semaphore> {
        let mut endpoints = self
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            endpoints
                .entry(endpoint_id.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(self.config.per_endpoint.max(1)))),
        )
    }
}
