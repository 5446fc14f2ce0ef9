//! Webhook endpoint configuration records.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use super::EndpointId;

/// A registered subscriber: target URL, signing secret and event filter.
///
/// The secret is redacted whenever the endpoint is serialized; the plaintext
/// is handed out once, by `create_webhook`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    /// Unique endpoint ID.
    pub id: EndpointId,

    /// Absolute http(s) URL deliveries are POSTed to.
    pub url: String,

    /// HMAC signing secret.
    #[serde(with = "secret_string_serde")]
    pub secret: SecretString,

    /// Subscribed event types (empty or `*` = all events).
    #[serde(default)]
    pub events: Vec<String>,

    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,

    /// Free-form metadata supplied by the creator.
    #[serde(default)]
    pub metadata: serde_json::Value,

    /// Whether deliveries are attempted. Inactive endpoints stay queryable.
    pub active: bool,

    /// Per-endpoint retry overrides.
    #[serde(default)]
    pub retry: EndpointRetry,

    /// Attempts made against this endpoint.
    pub delivery_count: u64,

    /// Attempts that succeeded.
    pub success_count: u64,

    /// Attempts that failed (retryable or not).
    pub failure_count: u64,

    /// Terminal delivery failures since the last success.
    pub consecutive_failures: u32,

    /// When the last attempt completed.
    pub last_delivery_at: Option<DateTime<Utc>>,

    /// Creation time.
    pub created_at: DateTime<Utc>,

    /// Last configuration change.
    pub updated_at: DateTime<Utc>,

    /// When the endpoint was disabled, if it is.
    pub disabled_at: Option<DateTime<Utc>>,
}

impl WebhookEndpoint {
    /// Checks if this endpoint should receive the given event type.
    #[must_use]
    pub fn matches_event(&self, event_type: &str) -> bool {
        if self.events.is_empty() {
            return true;
        }
        self.events.iter().any(|e| e == "*" || e == event_type)
    }
}

/// Retry settings an endpoint may override. `None` falls back to the engine policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRetry {
    /// Maximum attempts per delivery, including the first.
    pub max_attempts: Option<u32>,
    /// Base backoff delay in milliseconds.
    pub base_delay_ms: Option<u64>,
    /// Backoff ceiling in milliseconds.
    pub max_delay_ms: Option<u64>,
}

/// Input for registering an endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewEndpoint {
    /// Target URL.
    pub url: String,
    /// Subscribed event types.
    #[serde(default)]
    pub events: Vec<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Metadata.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Caller-supplied secret; generated when absent.
    #[serde(default)]
    pub secret: Option<String>,
    /// Retry overrides.
    #[serde(default)]
    pub retry: EndpointRetry,
}

impl NewEndpoint {
    /// Creates a registration request for a URL subscribed to all events.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Restricts the subscription to the given event types.
    #[must_use]
    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the signing secret instead of generating one.
    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Sets retry overrides.
    #[must_use]
    pub const fn with_retry(mut self, retry: EndpointRetry) -> Self {
        self.retry = retry;
        self
    }
}

/// Partial update of an endpoint's configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointPatch {
    /// New URL.
    pub url: Option<String>,
    /// New event subscription list.
    pub events: Option<Vec<String>>,
    /// New description.
    pub description: Option<String>,
    /// New metadata.
    pub metadata: Option<serde_json::Value>,
    /// New retry overrides.
    pub retry: Option<EndpointRetry>,
}

impl EndpointPatch {
    /// Whether the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.events.is_none()
            && self.description.is_none()
            && self.metadata.is_none()
            && self.retry.is_none()
    }
}

/// Filter for listing endpoints.
#[derive(Debug, Clone, Default)]
pub struct EndpointFilter {
    /// Only endpoints with this active flag.
    pub active: Option<bool>,
    /// Only endpoints that would receive this event type.
    pub event_type: Option<String>,
    /// Maximum results (`None` = unbounded).
    pub limit: Option<usize>,
}

impl EndpointFilter {
    /// Filter for active endpoints only.
    #[must_use]
    pub const fn active() -> Self {
        Self {
            active: Some(true),
            event_type: None,
            limit: None,
        }
    }

    /// Narrows the filter to endpoints subscribed to an event type.
    #[must_use]
    pub fn for_event(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Checks an endpoint against the filter (limit not applied).
    #[must_use]
    pub fn matches(&self, endpoint: &WebhookEndpoint) -> bool {
        if let Some(active) = self.active
            && endpoint.active != active
        {
            return false;
        }
        self.event_type
            .as_deref()
            .is_none_or(|t| endpoint.matches_event(t))
    }
}

/// Serde module for `SecretString` serialization.
pub mod secret_string_serde {
    use secrecy::SecretString;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes a placeholder; the secret itself is never written out.
    pub fn serialize<S>(_secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("***REDACTED***")
    }

    /// Deserializes a plaintext secret.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(SecretString::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(events: Vec<&str>, active: bool) -> WebhookEndpoint {
        let now = Utc::now();
        WebhookEndpoint {
            id: EndpointId::new("ep-1"),
            url: "https://example.com/hook".to_string(),
            secret: SecretString::from("s3cret".to_string()),
            events: events.into_iter().map(String::from).collect(),
            description: None,
            metadata: serde_json::Value::Null,
            active,
            retry: EndpointRetry::default(),
            delivery_count: 0,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            last_delivery_at: None,
            created_at: now,
            updated_at: now,
            disabled_at: None,
        }
    }

    #[test]
    fn test_matches_event_list() {
        let ep = endpoint(vec!["invoice.created", "invoice.paid"], true);
        assert!(ep.matches_event("invoice.created"));
        assert!(ep.matches_event("invoice.paid"));
        assert!(!ep.matches_event("expense.created"));
    }

    #[test]
    fn test_empty_and_wildcard_match_everything() {
        assert!(endpoint(vec![], true).matches_event("budget.exceeded"));
        assert!(endpoint(vec!["*"], true).matches_event("budget.exceeded"));
    }

    #[test]
    fn test_filter_active_and_event() {
        let filter = EndpointFilter::active().for_event("invoice.created");
        assert!(filter.matches(&endpoint(vec!["invoice.created"], true)));
        assert!(!filter.matches(&endpoint(vec!["invoice.created"], false)));
        assert!(!filter.matches(&endpoint(vec!["report.ready"], true)));
    }

    #[test]
    fn test_secret_is_redacted_on_serialize() {
        let json = serde_json::to_string(&endpoint(vec![], true)).expect("serialize");
        assert!(json.contains("***REDACTED***"));
        assert!(!json.contains("s3cret"));
    }
}
