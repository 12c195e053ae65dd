//! Chat Channel - HTTP POST to a chat incoming-webhook.
//!
//! The [`ChatChannel`] posts `{"text": ..., "username": ...}` to an incoming
//! webhook URL (Slack, Mattermost and Discord-compatible bridges accept this
//! shape). Server errors are retried a configurable number of times; client
//! errors are not.
//!
//! # Example
//!
//! ```rust,ignore
//! use notifilter::channels::ChatChannel;
//! use std::time::Duration;
//!
//! let channel = ChatChannel::new("https://hooks.slack.com/services/...")
//!     .with_timeout(Duration::from_secs(10))
//!     .with_retries(2);
//! ```

use super::{Channel, ChannelError, ChannelKind, SendReceipt};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default timeout for webhook requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retries on 5xx errors
const DEFAULT_RETRIES: u32 = 1;

/// A channel that delivers notifications to a chat webhook.
#[derive(Debug, Clone)]
pub struct ChatChannel {
    /// Incoming-webhook URL
    url: String,

    /// HTTP client (reused for connection pooling)
    client: Client,

    /// Request timeout
    timeout: Duration,

    /// Number of retries on 5xx errors
    retries: u32,
}

impl ChatChannel {
    /// Create a new ChatChannel targeting the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
        }
    }

    /// Set custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set number of retries on 5xx errors
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    fn build_payload(&self, routing_key: &str, body: &str) -> Value {
        json!({
            "text": body,
            "username": routing_key,
        })
    }

    /// Execute the webhook request with retries
    async fn send_request(&self, payload: &Value) -> Result<reqwest::Response, ChannelError> {
        let mut last_error = None;
        let mut attempts = 0;

        while attempts <= self.retries {
            if attempts > 0 {
                debug!(
                    attempt = attempts,
                    max_retries = self.retries,
                    "Retrying chat webhook request"
                );
            }

            let result = self
                .client
                .post(&self.url)
                .timeout(self.timeout)
                .json(payload)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    // Client error - don't retry
                    if status.is_client_error() {
                        warn!(
                            status = %status,
                            url = %self.url,
                            "Chat webhook returned client error"
                        );
                        return Ok(response);
                    }

                    warn!(
                        status = %status,
                        url = %self.url,
                        attempt = attempts,
                        "Chat webhook returned server error, will retry"
                    );
                    last_error = Some(ChannelError::Rejected(status.as_u16()));
                }
                Err(e) if e.is_timeout() => {
                    warn!(
                        url = %self.url,
                        attempt = attempts,
                        "Chat webhook request timed out"
                    );
                    last_error = Some(ChannelError::Timeout(self.timeout.as_millis() as u64));
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        url = %self.url,
                        attempt = attempts,
                        "Chat webhook request failed"
                    );
                    last_error = Some(ChannelError::Http(e));
                }
            }

            attempts += 1;
        }

        Err(last_error.unwrap_or_else(|| ChannelError::Failed("Unknown error".into())))
    }
}

#[async_trait]
impl Channel for ChatChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Chat
    }

    async fn send(&self, routing_key: &str, body: &str) -> Result<SendReceipt, ChannelError> {
        debug!(
            url = %self.url,
            routing_key = %routing_key,
            "Sending chat message"
        );

        let payload = self.build_payload(routing_key, body);
        let response = self.send_request(&payload).await?;
        let status = response.status();

        if status.is_success() {
            info!(
                url = %self.url,
                status = %status,
                routing_key = %routing_key,
                "Chat message delivered"
            );

            Ok(SendReceipt::with_metadata(
                &ChannelKind::Chat,
                format!("Chat message delivered to {} ({})", self.url, status),
                json!({
                    "url": self.url,
                    "status": status.as_u16(),
                }),
            ))
        } else {
            error!(
                url = %self.url,
                status = %status,
                routing_key = %routing_key,
                "Chat message delivery failed"
            );

            Err(ChannelError::Rejected(status.as_u16()))
        }
    }
}
