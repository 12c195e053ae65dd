//! Delivery channels for rendered notifications.
//!
//! A [`Channel`] is anything that can take a routing key and a rendered body
//! and deliver it somewhere. The [`ChannelDispatcher`] maps each
//! [`ChannelKind`] to the channel registered for it. A notifier whose kind has
//! no registered channel fails with [`DispatchError::UnknownChannel`]; there is
//! no fallback channel.
//!
//! ## Built-in Channels
//!
//! - [`EmailChannel`]: formats a MIME message and hands it to a [`MailTransport`]
//! - [`ChatChannel`]: posts to a chat incoming-webhook URL
//! - [`NullChannel`]: records sends in memory (tests only)
//!
//! ## Custom Channels
//!
//! ```rust,ignore
//! use notifilter::channels::{Channel, ChannelError, ChannelKind, SendReceipt};
//! use async_trait::async_trait;
//!
//! struct PagerChannel;
//!
//! #[async_trait]
//! impl Channel for PagerChannel {
//!     fn kind(&self) -> ChannelKind {
//!         ChannelKind::Other("pager".into())
//!     }
//!
//!     async fn send(&self, routing_key: &str, body: &str) -> Result<SendReceipt, ChannelError> {
//!         Ok(SendReceipt::success(&self.kind(), "paged"))
//!     }
//! }
//! ```

pub mod chat;
pub mod email;
pub mod null;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::event::Event;
use crate::notifier::Notifier;

pub use chat::ChatChannel;
pub use email::{EmailChannel, LogTransport, MailTransport};
pub use null::{NullChannel, SentMessage};

/// Errors a channel can report while sending.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The send timed out
    #[error("send timed out after {0}ms")]
    Timeout(u64),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote end answered with a non-success status
    #[error("remote rejected message with status {0}")]
    Rejected(u16),

    /// Generic delivery failure
    #[error("send failed: {0}")]
    Failed(String),
}

/// Errors from resolving and invoking a notifier's channel.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// No channel is registered for the notifier's kind
    #[error("no channel registered for kind '{0}'")]
    UnknownChannel(ChannelKind),

    /// The channel was found but delivery failed
    #[error("channel '{kind}' failed: {source}")]
    Send {
        kind: ChannelKind,
        #[source]
        source: ChannelError,
    },
}

/// The kind of channel a notifier delivers through.
///
/// Unrecognised names are kept as [`ChannelKind::Other`] so they can fail
/// explicitly at dispatch time instead of at load time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChannelKind {
    Email,
    Chat,
    Null,
    Other(String),
}

impl ChannelKind {
    pub fn as_str(&self) -> &str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Chat => "chat",
            ChannelKind::Null => "null",
            ChannelKind::Other(name) => name,
        }
    }
}

impl From<&str> for ChannelKind {
    fn from(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "email" | "mail" => ChannelKind::Email,
            "chat" | "slack" => ChannelKind::Chat,
            "null" => ChannelKind::Null,
            _ => ChannelKind::Other(name.trim().to_string()),
        }
    }
}

impl From<String> for ChannelKind {
    fn from(name: String) -> Self {
        ChannelKind::from(name.as_str())
    }
}

impl From<ChannelKind> for String {
    fn from(kind: ChannelKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful send.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Kind of the channel that delivered the message
    pub channel: ChannelKind,

    /// Human-readable description of what happened
    pub message: String,

    /// Optional channel-specific details
    pub metadata: Option<serde_json::Value>,
}

impl SendReceipt {
    pub fn success(channel: &ChannelKind, message: impl Into<String>) -> Self {
        Self {
            channel: channel.clone(),
            message: message.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(
        channel: &ChannelKind,
        message: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            channel: channel.clone(),
            message: message.into(),
            metadata: Some(metadata),
        }
    }
}

/// A delivery mechanism reached through a uniform send capability.
///
/// Implementations may block or fail; the dispatcher reports failures to
/// the caller and never retries on its own.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Kind this channel serves
    fn kind(&self) -> ChannelKind;

    /// Deliver a rendered body for the given routing key.
    async fn send(&self, routing_key: &str, body: &str) -> Result<SendReceipt, ChannelError>;
}

/// Resolves notifier channel kinds to registered channels.
pub struct ChannelDispatcher {
    channels: HashMap<ChannelKind, Arc<dyn Channel>>,
}

impl ChannelDispatcher {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Register a channel under its own kind, replacing any previous one.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let kind = channel.kind();
        debug!(kind = %kind, "Registering channel");
        self.channels.insert(kind, channel);
    }

    pub fn with_channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.register(channel);
        self
    }

    pub fn get(&self, kind: &ChannelKind) -> Option<Arc<dyn Channel>> {
        self.channels.get(kind).cloned()
    }

    pub fn is_registered(&self, kind: &ChannelKind) -> bool {
        self.channels.contains_key(kind)
    }

    /// Registered kinds, sorted by name.
    pub fn kinds(&self) -> Vec<&ChannelKind> {
        let mut kinds: Vec<&ChannelKind> = self.channels.keys().collect();
        kinds.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        kinds
    }

    /// Send a notifier's rendered body for an event through its channel.
    pub async fn dispatch(
        &self,
        notifier: &Notifier,
        event: &Event,
        body: &str,
    ) -> Result<SendReceipt, DispatchError> {
        let kind = notifier.channel();

        let channel = self.channels.get(kind).ok_or_else(|| {
            warn!(
                notifier_id = notifier.id(),
                kind = %kind,
                "Notifier references an unregistered channel"
            );
            DispatchError::UnknownChannel(kind.clone())
        })?;

        match channel.send(&event.routing_key, body).await {
            Ok(receipt) => {
                info!(
                    notifier_id = notifier.id(),
                    kind = %kind,
                    routing_key = %event.routing_key,
                    message = %receipt.message,
                    "Notification sent"
                );
                Ok(receipt)
            }
            Err(source) => {
                warn!(
                    notifier_id = notifier.id(),
                    kind = %kind,
                    routing_key = %event.routing_key,
                    error = %source,
                    "Notification send failed"
                );
                Err(DispatchError::Send {
                    kind: kind.clone(),
                    source,
                })
            }
        }
    }
}

impl Default for ChannelDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Payload;
    use serde_json::json;

    struct FailingChannel;

    #[async_trait]
    impl Channel for FailingChannel {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Chat
        }

        async fn send(&self, _routing_key: &str, _body: &str) -> Result<SendReceipt, ChannelError> {
            Err(ChannelError::Failed("boom".into()))
        }
    }

    fn event() -> Event {
        Event::new("User", Payload::from_value(json!({"name": "Go"})).unwrap())
    }

    #[test]
    fn test_channel_kind_parsing() {
        assert_eq!(ChannelKind::from("email"), ChannelKind::Email);
        assert_eq!(ChannelKind::from("slack"), ChannelKind::Chat);
        assert_eq!(ChannelKind::from("Chat"), ChannelKind::Chat);
        assert_eq!(ChannelKind::from("null"), ChannelKind::Null);
        assert_eq!(
            ChannelKind::from("sms"),
            ChannelKind::Other("sms".to_string())
        );
    }

    #[test]
    fn test_channel_kind_serde() {
        let kind: ChannelKind = serde_json::from_value(json!("slack")).unwrap();
        assert_eq!(kind, ChannelKind::Chat);
        assert_eq!(serde_json::to_value(&kind).unwrap(), json!("chat"));

        let other: ChannelKind = serde_json::from_value(json!("pager")).unwrap();
        assert_eq!(serde_json::to_value(&other).unwrap(), json!("pager"));
    }

    #[tokio::test]
    async fn test_dispatch_to_registered_channel() {
        let channel = Arc::new(NullChannel::for_kind(ChannelKind::Email));
        let dispatcher = ChannelDispatcher::new().with_channel(channel.clone());
        let notifier = Notifier::new("User", ChannelKind::Email, "name: {{name}}");

        let receipt = dispatcher
            .dispatch(&notifier, &event(), "name: Go")
            .await
            .unwrap();

        assert_eq!(receipt.channel, ChannelKind::Email);
        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].routing_key, "User");
        assert_eq!(sent[0].body, "name: Go");
    }

    #[tokio::test]
    async fn test_unknown_channel_fails_without_sending() {
        let chat = Arc::new(NullChannel::for_kind(ChannelKind::Chat));
        let dispatcher = ChannelDispatcher::new().with_channel(chat.clone());

        for kind in [ChannelKind::Email, ChannelKind::Other("sms".into())] {
            let notifier = Notifier::new("User", kind.clone(), "x");
            let err = dispatcher
                .dispatch(&notifier, &event(), "x")
                .await
                .unwrap_err();
            assert!(matches!(err, DispatchError::UnknownChannel(k) if k == kind));
        }

        assert!(chat.sent().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_is_reported() {
        let dispatcher = ChannelDispatcher::new().with_channel(Arc::new(FailingChannel));
        let notifier = Notifier::new("User", ChannelKind::Chat, "x");

        let err = dispatcher
            .dispatch(&notifier, &event(), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Send { kind: ChannelKind::Chat, .. }));
    }

    #[test]
    fn test_registry_lookup() {
        let dispatcher = ChannelDispatcher::new()
            .with_channel(Arc::new(NullChannel::for_kind(ChannelKind::Email)))
            .with_channel(Arc::new(NullChannel::new()));

        assert!(dispatcher.is_registered(&ChannelKind::Email));
        assert!(dispatcher.is_registered(&ChannelKind::Null));
        assert!(!dispatcher.is_registered(&ChannelKind::Chat));
        assert_eq!(
            dispatcher.kinds(),
            vec![&ChannelKind::Email, &ChannelKind::Null]
        );
    }
}
