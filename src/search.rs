//! Search-index capability (Elasticsearch-compatible).
//!
//! Used for observability only: the pipeline indexes each persisted event and
//! the admin surface reports counts. Nothing on the rule-evaluation path
//! depends on it, and indexing failures never block dispatch.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::event::Event;

/// Default index name for events
pub const DEFAULT_INDEX_NAME: &str = "notifilter";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("index returned status {status}: {body}")]
    Status { status: u16, body: String },
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Add a document to the named index.
    async fn index(&self, name: &str, document: &Value) -> Result<(), SearchError>;

    /// Number of documents in the named index.
    async fn count(&self, name: &str) -> Result<u64, SearchError>;
}

/// Document shape stored for each event.
pub fn event_document(event: &Event) -> Value {
    json!({
        "name": event.routing_key,
        "received_at": event.received_at,
        "data": event.payload,
    })
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

/// HTTP client for an Elasticsearch-compatible server.
#[derive(Debug, Clone)]
pub struct ElasticsearchIndex {
    base_url: String,
    client: Client,
    timeout: Duration,
}

impl ElasticsearchIndex {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn doc_url(&self, name: &str) -> String {
        format!("{}/{}/_doc", self.base_url, name)
    }

    fn count_url(&self, name: &str) -> String {
        format!("{}/{}/_count", self.base_url, name)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SearchError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SearchError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn index(&self, name: &str, document: &Value) -> Result<(), SearchError> {
        let response = self
            .client
            .post(self.doc_url(name))
            .timeout(self.timeout)
            .json(document)
            .send()
            .await?;
        Self::check(response).await?;

        debug!(index = %name, "Document indexed");
        Ok(())
    }

    async fn count(&self, name: &str) -> Result<u64, SearchError> {
        let response = self
            .client
            .get(self.count_url(name))
            .timeout(self.timeout)
            .send()
            .await?;
        let parsed: CountResponse = Self::check(response).await?.json().await?;

        Ok(parsed.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Payload;

    #[test]
    fn test_urls() {
        let index = ElasticsearchIndex::new("http://127.0.0.1:9200/");
        assert_eq!(index.doc_url("notifilter"), "http://127.0.0.1:9200/notifilter/_doc");
        assert_eq!(
            index.count_url("notifilter"),
            "http://127.0.0.1:9200/notifilter/_count"
        );
    }

    #[test]
    fn test_event_document() {
        let event = Event::new("User", Payload::from_value(json!({"name": "Go"})).unwrap())
            .with_received_at("2025-01-01T00:00:00+00:00");

        let doc = event_document(&event);
        assert_eq!(doc["name"], "User");
        assert_eq!(doc["received_at"], "2025-01-01T00:00:00+00:00");
        assert_eq!(doc["data"]["name"], "Go");
    }

    #[test]
    fn test_count_response_parsing() {
        let parsed: CountResponse =
            serde_json::from_str(r#"{"count": 42, "_shards": {"total": 1}}"#).unwrap();
        assert_eq!(parsed.count, 42);
    }
}
