//! Domain events handed to the engine for delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An event produced elsewhere in the application (e.g. `invoice.created`).
///
/// The engine does not interpret `data`; it only needs the event to be
/// serializable so the bytes can be signed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Opaque payload.
    pub data: serde_json::Value,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Creates an event with an explicit timestamp.
    #[must_use]
    pub fn at(
        event_type: impl Into<String>,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp,
        }
    }

    /// Event used by `test_webhook` when the caller supplies no payload.
    #[must_use]
    pub fn test_event() -> Self {
        Self::new(
            "webhook.test",
            serde_json::json!({
                "message": "This is a test webhook event",
                "source": "webhook-engine"
            }),
        )
    }

    /// Serializes the event to the canonical JSON body.
    ///
    /// Field order is fixed (`type`, `data`, `timestamp`) and object keys
    /// inside `data` are emitted sorted, so identical events always produce
    /// identical bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` contains values JSON cannot represent.
    pub fn to_canonical_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::InvalidInput(format!("Event payload is not serializable: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_canonical_json_shape() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).single().expect("ts");
        let event = Event::at(
            "invoice.created",
            serde_json::json!({"amount": 100, "invoiceId": "INV-001"}),
            ts,
        );

        let body = event.to_canonical_json().expect("json");
        assert_eq!(
            body,
            r#"{"type":"invoice.created","data":{"amount":100,"invoiceId":"INV-001"},"timestamp":"2024-01-15T10:30:00Z"}"#
        );
    }

    #[test]
    fn test_canonical_json_is_stable() {
        let event = Event::new("expense.approved", serde_json::json!({"b": 1, "a": [1, 2]}));
        assert_eq!(
            event.to_canonical_json().expect("first"),
            event.to_canonical_json().expect("second")
        );
    }
}
