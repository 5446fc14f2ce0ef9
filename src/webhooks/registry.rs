//! Endpoint registry.
//!
//! Validates and persists endpoint configuration. Endpoints are never
//! deleted: disabling one keeps its history and counters queryable.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use reqwest::Url;
use secrecy::SecretString;

use crate::models::{
    EndpointFilter, EndpointId, EndpointPatch, NewEndpoint, WebhookEndpoint,
};
use crate::storage::EndpointStore;
use crate::{Error, Result};

/// Longest accepted event type.
const MAX_EVENT_TYPE_LEN: usize = 128;

/// Validates a webhook target URL.
///
/// Accepts absolute `http`/`https` URLs with a host.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] with a message starting with `Invalid URL`.
pub fn validate_url(url: &str) -> Result<()> {
    let parsed =
        Url::parse(url.trim()).map_err(|e| Error::InvalidInput(format!("Invalid URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {},
        scheme => {
            return Err(Error::InvalidInput(format!(
                "Invalid URL: unsupported scheme '{scheme}'"
            )));
        },
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidInput("Invalid URL: missing host".to_string()));
    }

    Ok(())
}

/// Validates an event type such as `invoice.created`.
///
/// `*` subscribes to everything. Otherwise the type must be non-empty, at
/// most 128 characters, and made of ASCII letters, digits, `.`, `_`, `-`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for malformed event types.
pub fn validate_event_type(event_type: &str) -> Result<()> {
    if event_type == "*" {
        return Ok(());
    }
    if event_type.is_empty() || event_type.len() > MAX_EVENT_TYPE_LEN {
        return Err(Error::InvalidInput(format!(
            "Invalid event type: '{event_type}' must be 1-{MAX_EVENT_TYPE_LEN} characters"
        )));
    }
    if !event_type
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(Error::InvalidInput(format!(
            "Invalid event type: '{event_type}' contains unsupported characters"
        )));
    }
    if event_type.starts_with('.') || event_type.ends_with('.') || event_type.contains("..") {
        return Err(Error::InvalidInput(format!(
            "Invalid event type: '{event_type}' has an empty segment"
        )));
    }
    Ok(())
}

/// Generates a signing secret: 32 random bytes, hex encoded.
#[must_use]
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn normalize_events(events: &[String]) -> Result<Vec<String>> {
    let mut normalized: Vec<String> = Vec::with_capacity(events.len());
    for event in events {
        let event = event.trim();
        validate_event_type(event)?;
        if !normalized.iter().any(|e| e == event) {
            normalized.push(event.to_string());
        }
    }
    Ok(normalized)
}

/// Registry of webhook endpoints.
#[derive(Clone)]
pub struct EndpointRegistry {
    store: Arc<dyn EndpointStore>,
}

impl EndpointRegistry {
    /// Creates a registry over an endpoint store.
    #[must_use]
    pub fn new(store: Arc<dyn EndpointStore>) -> Self {
        Self { store }
    }

    /// Registers an endpoint.
    ///
    /// Returns the stored endpoint and the plaintext secret; this is the only
    /// place the secret is handed out.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a bad URL, event type or secret,
    /// or a storage error.
    pub fn create(&self, data: NewEndpoint) -> Result<(WebhookEndpoint, String)> {
        validate_url(&data.url)?;
        let events = normalize_events(&data.events)?;

        let secret = match data.secret {
            Some(secret) if secret.trim().is_empty() => {
                return Err(Error::InvalidInput(
                    "Invalid secret: must not be empty".to_string(),
                ));
            },
            Some(secret) => secret,
            None => generate_secret(),
        };

        let now = Utc::now();
        let endpoint = WebhookEndpoint {
            id: EndpointId::generate(),
            url: data.url.trim().to_string(),
            secret: SecretString::from(secret.clone()),
            events,
            description: data.description,
            metadata: data.metadata.unwrap_or(serde_json::Value::Null),
            active: true,
            retry: data.retry,
            delivery_count: 0,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            last_delivery_at: None,
            created_at: now,
            updated_at: now,
            disabled_at: None,
        };

        self.store.insert_endpoint(&endpoint)?;

        metrics::counter!("webhook_endpoints_created_total").increment(1);
        tracing::info!(
            endpoint_id = %endpoint.id,
            url = %endpoint.url,
            events = ?endpoint.events,
            "Registered webhook endpoint"
        );

        Ok((endpoint, secret))
    }

    /// Looks up an endpoint.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn find(&self, id: &EndpointId) -> Result<Option<WebhookEndpoint>> {
        self.store.get_endpoint(id)
    }

    /// Retrieves an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown IDs, or a storage error.
    pub fn get(&self, id: &EndpointId) -> Result<WebhookEndpoint> {
        self.find(id)?.ok_or_else(|| not_found(id))
    }

    /// Lists endpoints.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn list(&self, filter: &EndpointFilter) -> Result<Vec<WebhookEndpoint>> {
        self.store.list_endpoints(filter)
    }

    /// Applies a partial update.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown IDs, [`Error::InvalidInput`]
    /// for a bad URL or event type, or a storage error.
    pub fn update(&self, id: &EndpointId, patch: EndpointPatch) -> Result<WebhookEndpoint> {
        let mut endpoint = self.get(id)?;
        if patch.is_empty() {
            return Ok(endpoint);
        }

        if let Some(url) = patch.url {
            validate_url(&url)?;
            endpoint.url = url.trim().to_string();
        }
        if let Some(events) = patch.events {
            endpoint.events = normalize_events(&events)?;
        }
        if let Some(description) = patch.description {
            endpoint.description = Some(description);
        }
        if let Some(metadata) = patch.metadata {
            endpoint.metadata = metadata;
        }
        if let Some(retry) = patch.retry {
            endpoint.retry = retry;
        }
        endpoint.updated_at = Utc::now();

        if !self.store.update_endpoint(&endpoint)? {
            return Err(not_found(id));
        }
        tracing::info!(endpoint_id = %id, "Updated webhook endpoint");
        Ok(endpoint)
    }

    /// Soft-disables an endpoint. Pending retries are cancelled when they come due.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown IDs, or a storage error.
    pub fn disable(&self, id: &EndpointId) -> Result<WebhookEndpoint> {
        self.set_active(id, false)
    }

    /// Re-enables an endpoint and resets its failure streak.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown IDs, or a storage error.
    pub fn enable(&self, id: &EndpointId) -> Result<WebhookEndpoint> {
        self.set_active(id, true)
    }

    /// Replaces the signing secret and returns the new plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown IDs, or a storage error.
    pub fn rotate_secret(&self, id: &EndpointId) -> Result<String> {
        let mut endpoint = self.get(id)?;
        let secret = generate_secret();
        endpoint.secret = SecretString::from(secret.clone());
        endpoint.updated_at = Utc::now();

        if !self.store.update_endpoint(&endpoint)? {
            return Err(not_found(id));
        }
        tracing::info!(endpoint_id = %id, "Rotated webhook signing secret");
        Ok(secret)
    }

    fn set_active(&self, id: &EndpointId, active: bool) -> Result<WebhookEndpoint> {
        if !self.store.set_active(id, active, Utc::now())? {
            return Err(not_found(id));
        }
        tracing::info!(endpoint_id = %id, active, "Changed webhook endpoint state");
        self.get(id)
    }
}

fn not_found(id: &EndpointId) -> Error {
    Error::NotFound {
        kind: "webhook",
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteWebhookStore;
    use secrecy::ExposeSecret;
    use test_case::test_case;

    fn registry() -> EndpointRegistry {
        let store: Arc<dyn EndpointStore> = Arc::new(SqliteWebhookStore::in_memory().unwrap());
        EndpointRegistry::new(store)
    }

    #[test_case("https://x.test/hook" ; "https")]
    #[test_case("http://localhost:8080/hooks?x=1" ; "http with port")]
    #[test_case("  https://api.example.com  " ; "surrounding whitespace")]
    fn test_valid_urls(url: &str) {
        assert!(validate_url(url).is_ok());
    }

    #[test_case("invalid-url" ; "no scheme")]
    #[test_case("" ; "empty")]
    #[test_case("ftp://example.com/file" ; "ftp")]
    #[test_case("mailto:ops@example.com" ; "mailto")]
    #[test_case("/relative/path" ; "relative")]
    fn test_invalid_urls(url: &str) {
        let err = validate_url(url).unwrap_err();
        assert!(err.user_message().starts_with("Invalid URL"), "{err}");
    }

    #[test_case("invoice.created", true ; "dotted")]
    #[test_case("*", true ; "wildcard")]
    #[test_case("budget_exceeded-v2", true ; "underscore dash")]
    #[test_case("", false ; "empty")]
    #[test_case("invoice created", false ; "space")]
    #[test_case("invoice..created", false ; "empty segment")]
    #[test_case(".created", false ; "leading dot")]
    fn test_event_type_validation(event_type: &str, ok: bool) {
        assert_eq!(validate_event_type(event_type).is_ok(), ok);
    }

    #[test]
    fn test_generated_secret_shape() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_create_generates_secret_and_dedupes_events() {
        let registry = registry();
        let (endpoint, secret) = registry
            .create(NewEndpoint::new("https://x.test/hook").with_events([
                "invoice.created",
                "invoice.created",
                "invoice.paid",
            ]))
            .unwrap();

        assert_eq!(secret.len(), 64);
        assert_eq!(endpoint.secret.expose_secret(), secret);
        assert_eq!(endpoint.events, vec!["invoice.created", "invoice.paid"]);
        assert!(endpoint.active);

        let stored = registry.get(&endpoint.id).unwrap();
        assert_eq!(stored.secret.expose_secret(), secret);
    }

    #[test]
    fn test_create_keeps_supplied_secret() {
        let registry = registry();
        let (_, secret) = registry
            .create(NewEndpoint::new("https://x.test/hook").with_secret("whsec_custom"))
            .unwrap();
        assert_eq!(secret, "whsec_custom");
    }

    #[test]
    fn test_create_rejects_bad_input() {
        let registry = registry();
        assert!(matches!(
            registry.create(NewEndpoint::new("invalid-url")),
            Err(Error::InvalidInput(msg)) if msg.contains("Invalid URL")
        ));
        assert!(matches!(
            registry.create(NewEndpoint::new("https://x.test").with_events(["bad type"])),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            registry.create(NewEndpoint::new("https://x.test").with_secret("  ")),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_duplicate_urls_get_distinct_ids() {
        let registry = registry();
        let (a, _) = registry.create(NewEndpoint::new("https://x.test/hook")).unwrap();
        let (b, _) = registry.create(NewEndpoint::new("https://x.test/hook")).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_update_disable_enable_rotate() {
        let registry = registry();
        let (endpoint, secret) = registry.create(NewEndpoint::new("https://x.test/a")).unwrap();

        let updated = registry
            .update(
                &endpoint.id,
                EndpointPatch {
                    url: Some("https://x.test/b".to_string()),
                    description: Some("billing".to_string()),
                    ..EndpointPatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated.url, "https://x.test/b");
        assert_eq!(updated.description.as_deref(), Some("billing"));

        assert!(!registry.disable(&endpoint.id).unwrap().active);
        assert!(registry.enable(&endpoint.id).unwrap().active);

        let rotated = registry.rotate_secret(&endpoint.id).unwrap();
        assert_ne!(rotated, secret);
        assert_eq!(
            registry.get(&endpoint.id).unwrap().secret.expose_secret(),
            rotated
        );
    }

    #[test]
    fn test_unknown_ids_are_not_found() {
        let registry = registry();
        let missing = EndpointId::new("missing");
        assert!(matches!(registry.get(&missing), Err(Error::NotFound { kind: "webhook", .. })));
        assert!(matches!(registry.disable(&missing), Err(Error::NotFound { .. })));
        assert!(matches!(registry.rotate_secret(&missing), Err(Error::NotFound { .. })));
        assert!(matches!(
            registry.update(&missing, EndpointPatch::default()),
            Err(Error::NotFound { .. })
        ));
    }
}
