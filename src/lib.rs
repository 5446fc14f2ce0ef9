//! # Webhook Engine
//!
//! Outbound webhook delivery for the financial-management platform.
//!
//! The engine registers subscriber endpoints, signs event payloads with a
//! per-endpoint HMAC-SHA256 secret, transmits them over HTTP, classifies the
//! outcome, and retries transient failures with exponential backoff. Every
//! HTTP try is recorded as a delivery attempt so the full history of a
//! delivery can be audited and re-derived after a restart.
//!
//! ## Features
//!
//! - `sha256=<hex>` signatures with constant-time verification
//! - Retry state machine with jittered exponential backoff and dead-lettering
//! - Per-endpoint and global bulkheads so one slow subscriber cannot starve others
//! - `SQLite`-backed endpoint registry and attempt log with atomic counters
//! - Background worker that picks up due retries and recovers interrupted sends
//!
//! ## Example
//!
//! ```rust,ignore
//! use webhook_engine::models::{Event, NewEndpoint};
//! use webhook_engine::{EngineConfig, WebhookService};
//!
//! let config = EngineConfig::load(None)?;
//! let service = WebhookService::from_config(&config)?;
//! let created = service.create_webhook(
//!     NewEndpoint::new("https://x.test/hook").with_events(["invoice.created"]),
//! )?;
//! let endpoint_id = created.webhook_id.expect("registered");
//!
//! let event = Event::new("invoice.created", serde_json::json!({"invoiceId": "INV-001"}));
//! let result = service.deliver_event(&endpoint_id, &event).await?;
//! assert!(result.success);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod cli;
pub mod config;
pub mod models;
pub mod observability;
pub mod storage;
pub mod webhooks;

// Re-exports for convenience
pub use config::EngineConfig;
pub use models::{
    AttemptStatus, DeliveryAttempt, DeliveryId, EndpointId, Event, WebhookEndpoint,
};
pub use webhooks::WebhookService;

/// Error type for webhook engine operations.
///
/// Delivery outcomes (timeouts, 5xx, rejected payloads) are never reported
/// through this type: they are recorded on the delivery attempt instead. This
/// type covers caller mistakes and internal failures.
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed endpoint URL, bad event type, bad config value |
/// | `NotFound` | Unknown endpoint or delivery ID |
/// | `InvalidState` | Retrying a delivery that is terminal or in flight |
/// | `OperationFailed` | Storage I/O, HTTP client construction, runtime failures |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// The message is meant for the end user (e.g. `Invalid URL: ...`).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of record (`webhook`, `delivery`, `attempt`).
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// The requested transition is not allowed from the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - `SQLite` statements fail or the connection lock is poisoned
    /// - The HTTP client cannot be built
    /// - Observability or configuration initialization fails
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Returns the message suitable for showing to the person who made the request.
    ///
    /// Validation and state errors are surfaced verbatim, without the variant prefix.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidInput(msg) | Self::InvalidState(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Whether this error was caused by the caller rather than the engine.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_) | Self::NotFound { .. } | Self::InvalidState(_)
        )
    }
}

/// Result type alias for webhook engine operations.
pub type Result<T> = std::result::Result<T, Error>;
