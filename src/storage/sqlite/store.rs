//! `SQLite` implementation of the endpoint and attempt stores.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE webhook_endpoints (
//!     id TEXT PRIMARY KEY,
//!     url TEXT NOT NULL,
//!     secret TEXT NOT NULL,
//!     events TEXT NOT NULL,           -- JSON array
//!     description TEXT,
//!     metadata TEXT NOT NULL,         -- JSON value
//!     active INTEGER NOT NULL,
//!     retry TEXT NOT NULL,            -- JSON retry overrides
//!     delivery_count INTEGER NOT NULL DEFAULT 0,
//!     success_count INTEGER NOT NULL DEFAULT 0,
//!     failure_count INTEGER NOT NULL DEFAULT 0,
//!     consecutive_failures INTEGER NOT NULL DEFAULT 0,
//!     last_delivery_at INTEGER,
//!     created_at INTEGER NOT NULL,
//!     updated_at INTEGER NOT NULL,
//!     disabled_at INTEGER
//! );
//!
//! CREATE TABLE webhook_delivery_attempts (
//!     id TEXT PRIMARY KEY,
//!     delivery_id TEXT NOT NULL,
//!     endpoint_id TEXT NOT NULL,
//!     event_type TEXT NOT NULL,
//!     payload TEXT NOT NULL,
//!     signature TEXT,
//!     attempt_number INTEGER NOT NULL,
//!     max_attempts INTEGER NOT NULL,
//!     status TEXT NOT NULL,
//!     response_status_code INTEGER,
//!     response_time_ms INTEGER,
//!     error_message TEXT,
//!     scheduled_at INTEGER NOT NULL,
//!     sent_at INTEGER,
//!     completed_at INTEGER,
//!     UNIQUE (delivery_id, attempt_number)
//! );
//! ```
//!
//! Timestamps are Unix milliseconds.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use super::connection::{acquire_lock, configure_connection, open_database};
use crate::models::{
    AttemptId, AttemptStatus, DeliveryAttempt, DeliveryId, EndpointFilter, EndpointId,
    WebhookEndpoint,
};
use crate::storage::{AttemptStats, AttemptStore, EndpointStore};
use crate::{Error, Result};

const ENDPOINT_COLUMNS: &str = "id, url, secret, events, description, metadata, active, retry, \
     delivery_count, success_count, failure_count, consecutive_failures, \
     last_delivery_at, created_at, updated_at, disabled_at";

const ATTEMPT_COLUMNS: &str = "id, delivery_id, endpoint_id, event_type, payload, signature, \
     attempt_number, max_attempts, status, response_status_code, response_time_ms, \
     error_message, scheduled_at, sent_at, completed_at";

/// `SQLite`-backed store for webhook endpoints and delivery attempts.
pub struct SqliteWebhookStore {
    /// `SQLite` connection.
    conn: Mutex<Connection>,
}

// Mutex guards are held for the duration of database operations, which is correct behavior
#[allow(clippy::significant_drop_tightening)]
impl SqliteWebhookStore {
    /// Opens (or creates) the store at the given database path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: &Path) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(open_database(db_path)?),
        };
        store.create_schema()?;
        Ok(store)
    }

    /// Creates an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(failed("open_memory_db"))?;
        configure_connection(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS webhook_endpoints (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                secret TEXT NOT NULL,
                events TEXT NOT NULL,
                description TEXT,
                metadata TEXT NOT NULL,
                active INTEGER NOT NULL,
                retry TEXT NOT NULL,
                delivery_count INTEGER NOT NULL DEFAULT 0,
                success_count INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                last_delivery_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                disabled_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS webhook_delivery_attempts (
                id TEXT PRIMARY KEY,
                delivery_id TEXT NOT NULL,
                endpoint_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                signature TEXT,
                attempt_number INTEGER NOT NULL,
                max_attempts INTEGER NOT NULL,
                status TEXT NOT NULL,
                response_status_code INTEGER,
                response_time_ms INTEGER,
                error_message TEXT,
                scheduled_at INTEGER NOT NULL,
                sent_at INTEGER,
                completed_at INTEGER,
                UNIQUE (delivery_id, attempt_number)
            );

            CREATE INDEX IF NOT EXISTS idx_webhook_endpoints_active
                ON webhook_endpoints(active);
            CREATE INDEX IF NOT EXISTS idx_webhook_attempts_status_scheduled
                ON webhook_delivery_attempts(status, scheduled_at);
            CREATE INDEX IF NOT EXISTS idx_webhook_attempts_endpoint
                ON webhook_delivery_attempts(endpoint_id, scheduled_at);
            ",
        )
        .map_err(failed("create_store_schema"))
    }

    fn query_attempts(
        &self,
        operation: &'static str,
        where_clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<DeliveryAttempt>> {
        let conn = acquire_lock(&self.conn);
        let sql = format!("SELECT {ATTEMPT_COLUMNS} FROM webhook_delivery_attempts {where_clause}");
        let mut stmt = conn.prepare(&sql).map_err(failed(operation))?;
        let rows = stmt
            .query_map(params, attempt_from_row)
            .map_err(failed(operation))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(failed(operation))
    }
}

#[allow(clippy::significant_drop_tightening)]
impl EndpointStore for SqliteWebhookStore {
    fn insert_endpoint(&self, endpoint: &WebhookEndpoint) -> Result<()> {
        let events = to_json(&endpoint.events)?;
        let metadata = to_json(&endpoint.metadata)?;
        let retry = to_json(&endpoint.retry)?;

        let conn = acquire_lock(&self.conn);
        conn.execute(
            &format!(
                "INSERT INTO webhook_endpoints ({ENDPOINT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
            ),
            params![
                endpoint.id.as_str(),
                endpoint.url,
                endpoint.secret.expose_secret(),
                events,
                endpoint.description,
                metadata,
                endpoint.active,
                retry,
                clamp_count(endpoint.delivery_count),
                clamp_count(endpoint.success_count),
                clamp_count(endpoint.failure_count),
                endpoint.consecutive_failures,
                endpoint.last_delivery_at.map(to_millis),
                to_millis(endpoint.created_at),
                to_millis(endpoint.updated_at),
                endpoint.disabled_at.map(to_millis),
            ],
        )
        .map_err(failed("insert_endpoint"))?;
        Ok(())
    }

    fn get_endpoint(&self, id: &EndpointId) -> Result<Option<WebhookEndpoint>> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            &format!("SELECT {ENDPOINT_COLUMNS} FROM webhook_endpoints WHERE id = ?1"),
            params![id.as_str()],
            endpoint_from_row,
        )
        .optional()
        .map_err(failed("get_endpoint"))
    }

    fn list_endpoints(&self, filter: &EndpointFilter) -> Result<Vec<WebhookEndpoint>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENDPOINT_COLUMNS} FROM webhook_endpoints
                 WHERE (?1 IS NULL OR active = ?1)
                 ORDER BY created_at ASC, id ASC"
            ))
            .map_err(failed("list_endpoints"))?;
        let rows = stmt
            .query_map(params![filter.active], endpoint_from_row)
            .map_err(failed("list_endpoints"))?;

        let mut endpoints = Vec::new();
        for row in rows {
            let endpoint = row.map_err(failed("list_endpoints"))?;
            if filter.matches(&endpoint) {
                endpoints.push(endpoint);
            }
            if filter.limit.is_some_and(|limit| endpoints.len() >= limit) {
                break;
            }
        }
        Ok(endpoints)
    }

    fn update_endpoint(&self, endpoint: &WebhookEndpoint) -> Result<bool> {
        let events = to_json(&endpoint.events)?;
        let metadata = to_json(&endpoint.metadata)?;
        let retry = to_json(&endpoint.retry)?;

        let conn = acquire_lock(&self.conn);
        let changed = conn
            .execute(
                r"
                UPDATE webhook_endpoints
                SET url = ?2, secret = ?3, events = ?4, description = ?5,
                    metadata = ?6, retry = ?7, updated_at = ?8
                WHERE id = ?1
                ",
                params![
                    endpoint.id.as_str(),
                    endpoint.url,
                    endpoint.secret.expose_secret(),
                    events,
                    endpoint.description,
                    metadata,
                    retry,
                    to_millis(endpoint.updated_at),
                ],
            )
            .map_err(failed("update_endpoint"))?;
        Ok(changed > 0)
    }

    fn set_active(&self, id: &EndpointId, active: bool, at: DateTime<Utc>) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        let changed = conn
            .execute(
                r"
                UPDATE webhook_endpoints
                SET active = ?2,
                    updated_at = ?3,
                    disabled_at = CASE WHEN ?2 THEN NULL ELSE COALESCE(disabled_at, ?3) END,
                    consecutive_failures = CASE WHEN ?2 THEN 0 ELSE consecutive_failures END
                WHERE id = ?1
                ",
                params![id.as_str(), active, to_millis(at)],
            )
            .map_err(failed("set_endpoint_active"))?;
        Ok(changed > 0)
    }

    fn record_outcome(
        &self,
        id: &EndpointId,
        status: AttemptStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<u32>> {
        let succeeded = i64::from(status == AttemptStatus::Succeeded);
        let failed_attempt = i64::from(status.is_failure());
        // 0 = leave streak, 1 = extend, 2 = reset
        let streak: i64 = match status {
            AttemptStatus::Succeeded => 2,
            AttemptStatus::FailedPermanent | AttemptStatus::Exhausted => 1,
            _ => 0,
        };

        let conn = acquire_lock(&self.conn);
        conn.query_row(
            r"
            UPDATE webhook_endpoints
            SET delivery_count = delivery_count + 1,
                success_count = success_count + ?2,
                failure_count = failure_count + ?3,
                consecutive_failures = CASE ?4
                    WHEN 2 THEN 0
                    WHEN 1 THEN consecutive_failures + 1
                    ELSE consecutive_failures
                END,
                last_delivery_at = ?5
            WHERE id = ?1
            RETURNING consecutive_failures
            ",
            params![id.as_str(), succeeded, failed_attempt, streak, to_millis(at)],
            |row| row.get::<_, u32>(0),
        )
        .optional()
        .map_err(failed("record_endpoint_outcome"))
    }
}

#[allow(clippy::significant_drop_tightening)]
impl AttemptStore for SqliteWebhookStore {
    fn upsert_attempt(&self, attempt: &DeliveryAttempt) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            &format!(
                "INSERT INTO webhook_delivery_attempts ({ATTEMPT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(id) DO UPDATE SET
                     signature = excluded.signature,
                     status = excluded.status,
                     response_status_code = excluded.response_status_code,
                     response_time_ms = excluded.response_time_ms,
                     error_message = excluded.error_message,
                     scheduled_at = excluded.scheduled_at,
                     sent_at = excluded.sent_at,
                     completed_at = excluded.completed_at"
            ),
            params![
                attempt.id.as_str(),
                attempt.delivery_id.as_str(),
                attempt.endpoint_id.as_str(),
                attempt.event_type,
                attempt.payload,
                attempt.signature,
                attempt.attempt_number,
                attempt.max_attempts,
                attempt.status.as_str(),
                attempt.response_status_code,
                attempt.response_time_ms.map(clamp_count),
                attempt.error_message,
                to_millis(attempt.scheduled_at),
                attempt.sent_at.map(to_millis),
                attempt.completed_at.map(to_millis),
            ],
        )
        .map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => Error::InvalidState(format!(
                "Attempt {} of delivery {} already exists",
                attempt.attempt_number, attempt.delivery_id
            )),
            _ => failed("store_delivery_attempt")(e),
        })?;
        Ok(())
    }

    fn claim_attempt(&self, id: &AttemptId, at: DateTime<Utc>) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        let changed = conn
            .execute(
                r"
                UPDATE webhook_delivery_attempts
                SET status = 'sending', sent_at = ?2
                WHERE id = ?1 AND status = 'pending'
                ",
                params![id.as_str(), to_millis(at)],
            )
            .map_err(failed("claim_delivery_attempt"))?;
        Ok(changed == 1)
    }

    fn transition(&self, attempt: &DeliveryAttempt, expected: AttemptStatus) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        let changed = conn
            .execute(
                r"
                UPDATE webhook_delivery_attempts
                SET status = ?3, signature = ?4, response_status_code = ?5,
                    response_time_ms = ?6, error_message = ?7, scheduled_at = ?8,
                    sent_at = ?9, completed_at = ?10
                WHERE id = ?1 AND status = ?2
                ",
                params![
                    attempt.id.as_str(),
                    expected.as_str(),
                    attempt.status.as_str(),
                    attempt.signature,
                    attempt.response_status_code,
                    attempt.response_time_ms.map(clamp_count),
                    attempt.error_message,
                    to_millis(attempt.scheduled_at),
                    attempt.sent_at.map(to_millis),
                    attempt.completed_at.map(to_millis),
                ],
            )
            .map_err(failed("transition_delivery_attempt"))?;
        Ok(changed == 1)
    }

    fn get_attempt(&self, id: &AttemptId) -> Result<Option<DeliveryAttempt>> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            &format!("SELECT {ATTEMPT_COLUMNS} FROM webhook_delivery_attempts WHERE id = ?1"),
            params![id.as_str()],
            attempt_from_row,
        )
        .optional()
        .map_err(failed("get_delivery_attempt"))
    }

    fn latest_attempt(&self, delivery_id: &DeliveryId) -> Result<Option<DeliveryAttempt>> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            &format!(
                "SELECT {ATTEMPT_COLUMNS} FROM webhook_delivery_attempts
                 WHERE delivery_id = ?1
                 ORDER BY attempt_number DESC
                 LIMIT 1"
            ),
            params![delivery_id.as_str()],
            attempt_from_row,
        )
        .optional()
        .map_err(failed("get_latest_attempt"))
    }

    fn delivery_attempts(&self, delivery_id: &DeliveryId) -> Result<Vec<DeliveryAttempt>> {
        self.query_attempts(
            "get_delivery_history",
            "WHERE delivery_id = ?1 ORDER BY attempt_number ASC",
            params![delivery_id.as_str()],
        )
    }

    fn endpoint_attempts(
        &self,
        endpoint_id: &EndpointId,
        limit: usize,
    ) -> Result<Vec<DeliveryAttempt>> {
        self.query_attempts(
            "get_endpoint_history",
            "WHERE endpoint_id = ?1 ORDER BY scheduled_at DESC, attempt_number DESC LIMIT ?2",
            params![endpoint_id.as_str(), to_limit(limit)],
        )
    }

    fn due_attempts(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DeliveryAttempt>> {
        self.query_attempts(
            "get_due_attempts",
            "WHERE status = 'pending' AND scheduled_at <= ?1 ORDER BY scheduled_at ASC LIMIT ?2",
            params![to_millis(now), to_limit(limit)],
        )
    }

    fn stale_attempts(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DeliveryAttempt>> {
        self.query_attempts(
            "get_stale_attempts",
            "WHERE status = 'sending' AND COALESCE(sent_at, scheduled_at) < ?1
             ORDER BY sent_at ASC LIMIT ?2",
            params![to_millis(cutoff), to_limit(limit)],
        )
    }

    fn orphaned_retries(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DeliveryAttempt>> {
        self.query_attempts(
            "get_orphaned_retries",
            "WHERE status = 'failed_retryable'
               AND COALESCE(completed_at, scheduled_at) < ?1
               AND NOT EXISTS (
                   SELECT 1 FROM webhook_delivery_attempts later
                   WHERE later.delivery_id = webhook_delivery_attempts.delivery_id
                     AND later.attempt_number > webhook_delivery_attempts.attempt_number
               )
             ORDER BY completed_at ASC LIMIT ?2",
            params![to_millis(cutoff), to_limit(limit)],
        )
    }

    fn endpoint_stats(&self, endpoint_id: &EndpointId) -> Result<AttemptStats> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            r"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'succeeded' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status IN ('failed_retryable', 'failed_permanent', 'exhausted')
                    THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status IN ('pending', 'sending') THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'exhausted' THEN 1 ELSE 0 END), 0),
                COALESCE(AVG(response_time_ms), 0.0)
            FROM webhook_delivery_attempts
            WHERE endpoint_id = ?1
            ",
            params![endpoint_id.as_str()],
            |row| {
                Ok(AttemptStats {
                    total: count_to_usize(row.get(0)?),
                    succeeded: count_to_usize(row.get(1)?),
                    failed: count_to_usize(row.get(2)?),
                    pending: count_to_usize(row.get(3)?),
                    exhausted: count_to_usize(row.get(4)?),
                    avg_response_time_ms: row.get(5)?,
                })
            },
        )
        .map_err(failed("get_endpoint_stats"))
    }

    fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            r"
            DELETE FROM webhook_delivery_attempts
            WHERE delivery_id IN (
                SELECT delivery_id
                FROM webhook_delivery_attempts
                GROUP BY delivery_id
                HAVING SUM(CASE WHEN status IN ('succeeded', 'failed_permanent', 'exhausted')
                           THEN 1 ELSE 0 END) > 0
                   AND SUM(CASE WHEN status IN ('pending', 'sending') THEN 1 ELSE 0 END) = 0
                   AND MAX(COALESCE(completed_at, scheduled_at)) < ?1
            )
            ",
            params![to_millis(cutoff)],
        )
        .map_err(failed("purge_delivery_attempts"))
    }
}

fn failed(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> Error {
    move |e| Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::OperationFailed {
        operation: "encode_store_column".to_string(),
        cause: e.to_string(),
    })
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn clamp_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn count_to_usize(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

fn opt_time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let millis: Option<i64> = row.get(idx)?;
    millis
        .map(|ms| {
            DateTime::from_timestamp_millis(ms)
                .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
        })
        .transpose()
}

fn counter_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

fn endpoint_from_row(row: &Row<'_>) -> rusqlite::Result<WebhookEndpoint> {
    Ok(WebhookEndpoint {
        id: EndpointId::new(row.get::<_, String>(0)?),
        url: row.get(1)?,
        secret: SecretString::from(row.get::<_, String>(2)?),
        events: json_column(row, 3)?,
        description: row.get(4)?,
        metadata: json_column(row, 5)?,
        active: row.get(6)?,
        retry: json_column(row, 7)?,
        delivery_count: counter_column(row, 8)?,
        success_count: counter_column(row, 9)?,
        failure_count: counter_column(row, 10)?,
        consecutive_failures: row.get(11)?,
        last_delivery_at: opt_time_column(row, 12)?,
        created_at: time_column(row, 13)?,
        updated_at: time_column(row, 14)?,
        disabled_at: opt_time_column(row, 15)?,
    })
}

fn attempt_from_row(row: &Row<'_>) -> rusqlite::Result<DeliveryAttempt> {
    let status = row
        .get::<_, String>(8)?
        .parse::<AttemptStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;
    let response_time_ms: Option<i64> = row.get(10)?;

    Ok(DeliveryAttempt {
        id: AttemptId::new(row.get::<_, String>(0)?),
        delivery_id: DeliveryId::new(row.get::<_, String>(1)?),
        endpoint_id: EndpointId::new(row.get::<_, String>(2)?),
        event_type: row.get(3)?,
        payload: row.get(4)?,
        signature: row.get(5)?,
        attempt_number: row.get(6)?,
        max_attempts: row.get(7)?,
        status,
        response_status_code: row.get(9)?,
        response_time_ms: response_time_ms.and_then(|ms| u64::try_from(ms).ok()),
        error_message: row.get(11)?,
        scheduled_at: time_column(row, 12)?,
        sent_at: opt_time_column(row, 13)?,
        completed_at: opt_time_column(row, 14)?,
    })
}
