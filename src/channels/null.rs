//! Null Channel - records messages instead of delivering them.
//!
//! Test double: register it under any kind and inspect what would have
//! been sent. Every message is kept in memory, so it is not wired into
//! production dispatchers.

use super::{Channel, ChannelError, ChannelKind, SendReceipt};
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::debug;

/// A message captured by a [`NullChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub routing_key: String,
    pub body: String,
}

/// A channel that keeps every message in memory.
#[derive(Debug)]
pub struct NullChannel {
    kind: ChannelKind,
    sent: Mutex<Vec<SentMessage>>,
}

impl NullChannel {
    /// Null channel registered under [`ChannelKind::Null`]
    pub fn new() -> Self {
        Self::for_kind(ChannelKind::Null)
    }

    /// Null channel standing in for another kind
    pub fn for_kind(kind: ChannelKind) -> Self {
        Self {
            kind,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Messages recorded so far, in send order.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl Default for NullChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for NullChannel {
    fn kind(&self) -> ChannelKind {
        self.kind.clone()
    }

    async fn send(&self, routing_key: &str, body: &str) -> Result<SendReceipt, ChannelError> {
        debug!(kind = %self.kind, routing_key = %routing_key, "Recording message");

        let mut sent = self
            .sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sent.push(SentMessage {
            routing_key: routing_key.to_string(),
            body: body.to_string(),
        });

        Ok(SendReceipt::success(
            &self.kind,
            format!("Recorded message #{} for {}", sent.len(), routing_key),
        ))
    }
}
