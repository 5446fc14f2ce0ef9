//! Background delivery worker.
//!
//! Each tick recovers attempts stuck in `sending` (the process died or the
//! send was lost), reschedules retryable failures whose follow-up attempt
//! was never stored, then claims due `pending` attempts and starts them.
//!
//! Sends outlive the tick that started them. The running worker keeps them
//! in one [`JoinSet`] and reaps each as it finishes, so a subscriber that
//! hangs until its timeout only holds its own attempt. At most
//! `max_in_flight` attempts run at once. Shutdown stops claiming and waits
//! for the sends already started.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use super::dispatcher::{DeliveryFailure, DispatchReport, Dispatcher, SendOutcome};
use crate::models::{AttemptStatus, DeliveryAttempt};
use crate::storage::{AttemptStore, EndpointStore};
use crate::{Error, Result};

/// Error recorded on attempts recovered from `sending`.
const INTERRUPTED: &str = "Delivery interrupted before a response was recorded";

/// Worker settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// How often to poll for due attempts, in milliseconds (default: 1000).
    pub poll_interval_ms: u64,

    /// Maximum attempts claimed per tick (default: 100).
    pub batch_size: usize,

    /// Maximum attempts running at once across ticks (default: 256).
    pub max_in_flight: usize,

    /// How long an attempt may stay `sending` before it is treated as
    /// interrupted, in milliseconds.
    ///
    /// Default: twice the request timeout plus the bulkhead acquire timeout.
    pub stale_after_ms: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            batch_size: 100,
            max_in_flight: 256,
            stale_after_ms: None,
        }
    }
}

impl WorkerConfig {
    /// Poll interval as a duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Stale `sending` attempts that were settled as interrupted.
    pub recovered: usize,
    /// Retryable failures whose missing follow-up attempt was stored.
    pub rescheduled: usize,
    /// Due attempts claimed.
    pub claimed: usize,
    /// Claimed attempts that succeeded.
    pub succeeded: usize,
    /// Claimed attempts that failed (retryable or not).
    pub failed: usize,
    /// Claimed attempts cancelled because their endpoint is gone or disabled.
    pub cancelled: usize,
}

impl TickReport {
    /// Whether the tick found nothing to do.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.recovered == 0 && self.rescheduled == 0 && self.claimed == 0
    }

    fn count(&mut self, processed: &Processed) {
        match processed {
            Processed::Dispatched(dispatch) if dispatch.succeeded() => self.succeeded += 1,
            Processed::Dispatched(_) => self.failed += 1,
            Processed::Cancelled => self.cancelled += 1,
        }
    }
}

enum Processed {
    Dispatched(DispatchReport),
    Cancelled,
}

type AttemptTasks = JoinSet<Result<Processed>>;

/// Logs a finished attempt task and returns what it did, if it completed.
fn reap(joined: std::result::Result<Result<Processed>, JoinError>) -> Option<Processed> {
    match joined {
        Ok(Ok(processed)) => Some(processed),
        Ok(Err(Error::InvalidState(message))) => {
            tracing::debug!(message, "Skipped attempt settled elsewhere");
            None
        },
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Failed to process webhook attempt");
            None
        },
        Err(e) => {
            tracing::error!(error = %e, "Webhook attempt task failed");
            None
        },
    }
}

/// Polls storage for due attempts and executes them.
#[derive(Clone)]
pub struct DeliveryWorker {
    endpoints: Arc<dyn EndpointStore>,
    attempts: Arc<dyn AttemptStore>,
    dispatcher: Arc<Dispatcher>,
    config: WorkerConfig,
    stale_after: Duration,
}

impl DeliveryWorker {
    /// Creates a worker.
    #[must_use]
    pub fn new(
        endpoints: Arc<dyn EndpointStore>,
        attempts: Arc<dyn AttemptStore>,
        dispatcher: Arc<Dispatcher>,
        config: WorkerConfig,
    ) -> Self {
        let stale_after = config.stale_after_ms.map_or_else(
            || {
                dispatcher.request_timeout() * 2
                    + Duration::from_millis(dispatcher.bulkhead().config().acquire_timeout_ms)
            },
            Duration::from_millis,
        );
        Self {
            endpoints,
            attempts,
            dispatcher,
            config,
            stale_after,
        }
    }

    /// Age after which a `sending` attempt is considered interrupted.
    #[must_use]
    pub const fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Runs one tick and waits for every attempt it started.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be queried. Failures of individual
    /// attempts are logged and counted, not returned.
    pub async fn run_once(&self) -> Result<TickReport> {
        let mut tasks = AttemptTasks::new();
        let mut report = self.tick(&mut tasks)?;

        while let Some(joined) = tasks.join_next().await {
            if let Some(processed) = reap(joined) {
                report.count(&processed);
            }
        }

        if !report.is_idle() {
            tracing::debug!(
                recovered = report.recovered,
                rescheduled = report.rescheduled,
                claimed = report.claimed,
                succeeded = report.succeeded,
                failed = report.failed,
                cancelled = report.cancelled,
                "Delivery worker tick finished"
            );
        }
        Ok(report)
    }

    /// Runs ticks until `shutdown` turns `true` (or its sender is dropped),
    /// then waits for the attempts still in flight.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            max_in_flight = self.config.max_in_flight,
            stale_after_ms = u64::try_from(self.stale_after.as_millis()).unwrap_or(u64::MAX),
            "Starting delivery worker"
        );

        let period = self.config.poll_interval().max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tasks = AttemptTasks::new();

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick(&mut tasks) {
                        Ok(report) if !report.is_idle() => tracing::debug!(
                            recovered = report.recovered,
                            rescheduled = report.rescheduled,
                            claimed = report.claimed,
                            in_flight = tasks.len(),
                            "Delivery worker tick started attempts"
                        ),
                        Ok(_) => {},
                        Err(e) => tracing::error!(error = %e, "Delivery worker tick failed"),
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    reap(joined);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        if !tasks.is_empty() {
            tracing::info!(in_flight = tasks.len(), "Waiting for in-flight webhook attempts");
        }
        while let Some(joined) = tasks.join_next().await {
            reap(joined);
        }
        tracing::info!("Delivery worker stopped");
    }

    /// Starts the worker on its own task.
    #[must_use]
    pub fn spawn(&self) -> WorkerHandle {
        let (tx, rx) = watch::channel(false);
        let worker = self.clone();
        let handle = tokio::spawn(async move { worker.run(rx).await });
        WorkerHandle {
            shutdown: tx,
            handle,
        }
    }

    /// Recovery passes, then claims due attempts into `tasks` up to the
    /// in-flight limit. Does not wait for the sends.
    fn tick(&self, tasks: &mut AttemptTasks) -> Result<TickReport> {
        let mut report = TickReport::default();
        if let Some(cutoff) = self.stale_cutoff() {
            report.recovered = self.recover_stale(cutoff)?;
            report.rescheduled = self.reschedule_orphans(cutoff)?;
        }

        let capacity = self
            .config
            .max_in_flight
            .saturating_sub(tasks.len())
            .min(self.config.batch_size);
        if capacity == 0 {
            tracing::debug!(in_flight = tasks.len(), "Delivery worker at capacity");
            return Ok(report);
        }

        let now = Utc::now();
        for mut attempt in self.attempts.due_attempts(now, capacity)? {
            if !self.attempts.claim_attempt(&attempt.id, now)? {
                continue;
            }
            attempt.status = AttemptStatus::Sending;
            attempt.sent_at = Some(now);
            report.claimed += 1;

            let worker = self.clone();
            tasks.spawn(async move { worker.process(attempt).await });
        }
        Ok(report)
    }

    fn stale_cutoff(&self) -> Option<DateTime<Utc>> {
        TimeDelta::from_std(self.stale_after)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
    }

    fn recover_stale(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut recovered = 0;
        for attempt in self
            .attempts
            .stale_attempts(cutoff, self.config.batch_size)?
        {
            let endpoint = self.endpoints.get_endpoint(&attempt.endpoint_id)?;
            let outcome =
                SendOutcome::failed(None, DeliveryFailure::Transient(INTERRUPTED.to_string()));
            let delivery_id = attempt.delivery_id.clone();

            match self.dispatcher.finalize(endpoint.as_ref(), attempt, outcome) {
                Ok(_) => {
                    recovered += 1;
                    tracing::warn!(delivery_id = %delivery_id, "Recovered interrupted webhook attempt");
                },
                Err(Error::InvalidState(_)) => {},
                Err(e) => return Err(e),
            }
        }

        if recovered > 0 {
            metrics::counter!("webhook_attempts_recovered_total")
                .increment(u64::try_from(recovered).unwrap_or(u64::MAX));
        }
        Ok(recovered)
    }

    /// Stores the follow-up of retryable failures left without one, e.g.
    /// when the process stopped between recording an attempt and
    /// scheduling its retry.
    fn reschedule_orphans(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut rescheduled = 0;
        for attempt in self
            .attempts
            .orphaned_retries(cutoff, self.config.batch_size)?
        {
            let endpoint = self.endpoints.get_endpoint(&attempt.endpoint_id)?;
            match self
                .dispatcher
                .scheduler()
                .schedule_next(endpoint.as_ref(), &attempt)
            {
                Ok(next) => {
                    rescheduled += 1;
                    tracing::warn!(
                        delivery_id = %next.delivery_id,
                        attempt_number = next.attempt_number,
                        "Rescheduled webhook retry that was never stored"
                    );
                },
                Err(Error::InvalidState(_)) => {},
                Err(e) => return Err(e),
            }
        }

        if rescheduled > 0 {
            metrics::counter!("webhook_retries_rescheduled_total")
                .increment(u64::try_from(rescheduled).unwrap_or(u64::MAX));
        }
        Ok(rescheduled)
    }

    async fn process(&self, attempt: DeliveryAttempt) -> Result<Processed> {
        match self.endpoints.get_endpoint(&attempt.endpoint_id)? {
            Some(endpoint) if endpoint.active => self
                .dispatcher
                .execute(&endpoint, attempt)
                .await
                .map(Processed::Dispatched),
            Some(_) => self
                .dispatcher
                .cancel(attempt, "Endpoint is disabled")
                .map(|_| Processed::Cancelled),
            None => self
                .dispatcher
                .cancel(attempt, "Endpoint no longer exists")
                .map(|_| Processed::Cancelled),
        }
    }
}

/// Handle to a spawned [`DeliveryWorker`].
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stops the worker and waits for it and its in-flight attempts.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Delivery worker task failed");
        }
    }

    /// Whether the worker task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
