//! Data models for the webhook engine.
//!
//! Endpoints and delivery attempts are the two persisted records; events are
//! opaque inputs supplied by the caller.

mod attempt;
mod endpoint;
mod event;
mod ids;

pub use attempt::{AttemptStatus, DeliveryAttempt};
pub use endpoint::{
    EndpointFilter, EndpointPatch, EndpointRetry, NewEndpoint, WebhookEndpoint, secret_string_serde,
};
pub use event::Event;
pub use ids::{AttemptId, DeliveryId, EndpointId};
