//! HTTP transport for webhook deliveries.
//!
//! [`WebhookTransport`] sends one signed POST and reports what came back.
//! It does not classify or retry; that is the dispatcher's job. The
//! production implementation is [`HttpTransport`] on `reqwest`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::{Error, Result};

use super::signature::SIGNATURE_HEADER;

/// Header carrying the event type.
pub const EVENT_HEADER: &str = "X-Webhook-Event";

/// Longest response body excerpt kept for error messages.
const BODY_EXCERPT_LIMIT: usize = 256;

/// A fully built outbound webhook request.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// Target URL.
    pub url: String,
    /// Exact body bytes that were signed.
    pub body: Vec<u8>,
    /// `sha256=<hex>` signature over `body`.
    pub signature: String,
    /// Event type.
    pub event_type: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// What the subscriber answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Start of the response body, if any.
    pub body_excerpt: Option<String>,
}

/// Failure to obtain any HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request did not complete within its timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),
    /// Any other transport-level failure.
    #[error("request failed: {0}")]
    Request(String),
}

/// Boxed future returned by [`WebhookTransport::send`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<TransportResponse, TransportError>> + Send + 'a>>;

/// Sends webhook requests.
pub trait WebhookTransport: Send + Sync {
    /// POSTs the request and returns the response status.
    fn send(&self, request: OutboundRequest) -> TransportFuture<'_>;
}

/// `reqwest`-backed transport.
pub struct HttpTransport {
    /// HTTP client with connection pooling.
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport whose client enforces `timeout` on every request.
    ///
    /// Redirects are not followed; a 3xx is reported as-is.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("webhook-engine/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| Error::OperationFailed {
                operation: "build_http_client".to_string(),
                cause: e.to_string(),
            })?;

        Ok(Self { client })
    }

    async fn post(
        &self,
        request: OutboundRequest,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(&request.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, &request.signature)
            .header(EVENT_HEADER, &request.event_type)
            .timeout(request.timeout)
            .body(request.body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e, request.timeout))?;

        let status = response.status().as_u16();
        let body_excerpt = response
            .text()
            .await
            .ok()
            .filter(|text| !text.is_empty())
            .map(|text| excerpt(&text));

        Ok(TransportResponse {
            status,
            body_excerpt,
        })
    }
}

impl WebhookTransport for HttpTransport {
    fn send(&self, request: OutboundRequest) -> TransportFuture<'_> {
        Box::pin(self.post(request))
    }
}

fn classify_reqwest_error(error: &reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout)
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Request(error.to_string())
    }
}

fn excerpt(text: &str) -> String {
    match text.char_indices().nth(BODY_EXCERPT_LIMIT) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Scripted reply for [`MockTransport`].
#[cfg(test)]
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Answer with this status.
    Status(u16),
    /// Wait, then answer with this status.
    Delayed(Duration, u16),
    /// Fail with a transport error.
    Fail(TransportError),
    /// Panic while sending.
    Panic,
}

/// Mock transport for testing.
#[cfg(test)]
pub struct MockTransport {
    /// Replies returned in order; `Status(200)` once exhausted.
    replies: std::sync::Mutex<std::collections::VecDeque<MockReply>>,
    /// Requests that were sent.
    pub sent: std::sync::Mutex<Vec<OutboundRequest>>,
}

#[cfg(test)]
impl MockTransport {
    /// Creates a mock answering the given replies in order.
    pub fn new(replies: impl IntoIterator<Item = MockReply>) -> Self {
        Self {
            replies: std::sync::Mutex::new(replies.into_iter().collect()),
            sent: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Returns the number of requests sent.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("lock").len()
    }
}

#[cfg(test)]
impl WebhookTransport for MockTransport {
    fn send(&self, request: OutboundRequest) -> TransportFuture<'_> {
        self.sent.lock().expect("lock").push(request);
        let reply = self
            .replies
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or(MockReply::Status(200));

        Box::pin(async move {
            match reply {
                MockReply::Status(status) => Ok(TransportResponse {
                    status,
                    body_excerpt: None,
                }),
                MockReply::Delayed(delay, status) => {
                    tokio::time::sleep(delay).await;
                    Ok(TransportResponse {
                        status,
                        body_excerpt: None,
                    })
                },
                MockReply::Fail(error) => Err(error),
                MockReply::Panic => panic!("mock transport panicked"),
            }
        })
    }
}
