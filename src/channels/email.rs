//! Email Channel - MIME-formatted notifications.
//!
//! The [`EmailChannel`] wraps a rendered body into a MIME message from a
//! fixed sender address and hands it to a [`MailTransport`]. The transport is
//! the seam where an SMTP client plugs in; [`LogTransport`] is the built-in
//! one and only logs the outgoing message.
//!
//! # Example
//!
//! ```rust,ignore
//! use notifilter::channels::{EmailChannel, LogTransport};
//! use std::sync::Arc;
//!
//! let channel = EmailChannel::new("Notifilter <alerts@example.com>", "dev@example.com")
//!     .with_subject("Alert for {routing_key}")
//!     .with_transport(Arc::new(LogTransport));
//! ```

use super::{Channel, ChannelError, ChannelKind, SendReceipt};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// Default subject line; `{routing_key}` is replaced per message.
const DEFAULT_SUBJECT: &str = "Notification: {routing_key}";

/// Delivers a fully formatted MIME message.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Short name used in receipts and logs
    fn name(&self) -> &str {
        "mail"
    }

    async fn deliver(&self, from: &str, to: &str, message: &str) -> Result<(), ChannelError>;
}

/// Transport that writes the message to the log instead of a mail server.
#[derive(Debug, Clone, Default)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, from: &str, to: &str, message: &str) -> Result<(), ChannelError> {
        info!(
            from = %from,
            to = %to,
            bytes = message.len(),
            "Email handed to log transport, not delivered"
        );
        // Body carries event payload data
        debug!(message = %message, "Email message");
        Ok(())
    }
}

/// A channel that sends notifications as email.
#[derive(Clone)]
pub struct EmailChannel {
    from: String,
    to: String,
    subject: String,
    transport: Arc<dyn MailTransport>,
}

impl EmailChannel {
    /// Create an email channel using the log transport
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            subject: DEFAULT_SUBJECT.to_string(),
            transport: Arc::new(LogTransport),
        }
    }

    /// Set the subject template (`{routing_key}` is substituted)
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.transport = transport;
        self
    }

    fn subject_for(&self, routing_key: &str) -> String {
        self.subject.replace("{routing_key}", routing_key)
    }

    /// Build the MIME message for one notification.
    pub fn format_message(&self, routing_key: &str, body: &str) -> String {
        format!(
            "From: {from}\r\n\
             To: {to}\r\n\
             Subject: {subject}\r\n\
             Date: {date}\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: text/html; charset=\"UTF-8\"\r\n\
             \r\n\
             <html>\r\n<body>\r\n{body}\r\n</body>\r\n</html>\r\n",
            from = self.from,
            to = self.to,
            subject = self.subject_for(routing_key),
            date = Utc::now().to_rfc2822(),
            body = body,
        )
    }
}

#[async_trait]
impl Channel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, routing_key: &str, body: &str) -> Result<SendReceipt, ChannelError> {
        let message = self.format_message(routing_key, body);

        debug!(
            to = %self.to,
            routing_key = %routing_key,
            "Sending email"
        );

        self.transport.deliver(&self.from, &self.to, &message).await?;

        Ok(SendReceipt::with_metadata(
            &ChannelKind::Email,
            format!(
                "Email for {} handed to {} transport",
                self.to,
                self.transport.name()
            ),
            json!({
                "to": self.to,
                "transport": self.transport.name(),
                "subject": self.subject_for(routing_key),
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingTransport {
        delivered: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl MailTransport for CapturingTransport {
        async fn deliver(&self, from: &str, to: &str, message: &str) -> Result<(), ChannelError> {
            self.delivered
                .lock()
                .unwrap()
                .push((from.to_string(), to.to_string(), message.to_string()));
            Ok(())
        }
    }

    struct RefusingTransport;

    #[async_trait]
    impl MailTransport for RefusingTransport {
        async fn deliver(&self, _: &str, _: &str, _: &str) -> Result<(), ChannelError> {
            Err(ChannelError::Failed("relay refused".into()))
        }
    }

    #[test]
    fn test_format_message_headers() {
        let channel = EmailChannel::new("Alerts <alerts@example.com>", "dev@example.com");
        let message = channel.format_message("User", "name: Go");

        assert!(message.starts_with("From: Alerts <alerts@example.com>\r\n"));
        assert!(message.contains("To: dev@example.com\r\n"));
        assert!(message.contains("Subject: Notification: User\r\n"));
        assert!(message.contains("MIME-Version: 1.0\r\n"));
        assert!(message.contains("Content-Type: text/html; charset=\"UTF-8\"\r\n\r\n"));
        assert!(message.contains("<body>\r\nname: Go\r\n</body>"));
    }

    #[test]
    fn test_custom_subject() {
        let channel = EmailChannel::new("a@example.com", "b@example.com")
            .with_subject("[{routing_key}] alert");
        assert!(channel
            .format_message("Order", "x")
            .contains("Subject: [Order] alert\r\n"));
    }

    #[tokio::test]
    async fn test_send_hands_message_to_transport() {
        let transport = Arc::new(CapturingTransport::default());
        let channel = EmailChannel::new("a@example.com", "b@example.com")
            .with_transport(transport.clone());

        let receipt = channel.send("User", "hello").await.unwrap();
        assert_eq!(receipt.channel, ChannelKind::Email);
        assert_eq!(receipt.metadata.unwrap()["to"], "b@example.com");

        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "a@example.com");
        assert_eq!(delivered[0].1, "b@example.com");
        assert!(delivered[0].2.contains("hello"));
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let channel = EmailChannel::new("a@example.com", "b@example.com")
            .with_transport(Arc::new(RefusingTransport));
        assert!(matches!(
            channel.send("User", "x").await,
            Err(ChannelError::Failed(_))
        ));
    }

    #[tokio::test]
    async fn test_log_transport_receipt_does_not_claim_delivery() {
        let channel = EmailChannel::new("a@example.com", "b@example.com");
        let receipt = channel.send("User", "x").await.unwrap();

        assert_eq!(receipt.message, "Email for b@example.com handed to log transport");
        assert!(!receipt.message.contains("sent"));
        assert_eq!(receipt.metadata.unwrap()["transport"], "log");
    }
}
