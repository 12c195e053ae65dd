//! Durable storage for ingested events.
//!
//! The pipeline persists every decoded event before evaluating notifiers.
//! [`RedisEventStore`] appends events to a capped Redis stream;
//! [`MemoryEventStore`] keeps them in process for tests and local runs.
//!
//! # Example
//!
//! ```rust,ignore
//! use notifilter::store::{EventStore, RedisEventStore};
//!
//! let store = RedisEventStore::connect("redis://localhost:6379", "notifilter:incoming", 100_000)?;
//! let record_id = store.store(&event).await?;
//! let total = store.count().await?;
//! ```

use async_trait::async_trait;
use deadpool_redis::redis::cmd;
use deadpool_redis::{Config, Pool, Runtime};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, error};

use crate::event::Event;

/// Default Redis stream that holds incoming events
pub const DEFAULT_STREAM_NAME: &str = "notifilter:incoming";

/// Default cap on stream length (older entries are trimmed)
pub const DEFAULT_MAX_LEN: usize = 100_000;

/// Opaque identifier assigned by the store.
pub type RecordId = String;

/// Errors that can occur when persisting events.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store command error: {0}")]
    Command(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Persistence capability used by the pipeline.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist one event and return its record id.
    async fn store(&self, event: &Event) -> Result<RecordId, StoreError>;

    /// Number of events currently stored.
    async fn count(&self) -> Result<u64, StoreError>;
}

/// Event store backed by a Redis stream.
#[derive(Clone)]
pub struct RedisEventStore {
    pool: Pool,
    stream: String,
    max_len: usize,
}

impl RedisEventStore {
    pub fn new(pool: Pool, stream: impl Into<String>, max_len: usize) -> Self {
        Self {
            pool,
            stream: stream.into(),
            max_len,
        }
    }

    /// Create a connection pool for `url` and wrap it.
    pub fn connect(
        url: impl Into<String>,
        stream: impl Into<String>,
        max_len: usize,
    ) -> Result<Self, StoreError> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self::new(pool, stream, max_len))
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }
}

#[async_trait]
impl EventStore for RedisEventStore {
    async fn store(&self, event: &Event) -> Result<RecordId, StoreError> {
        let mut conn = self.pool.get().await.map_err(|e| {
            error!(error = %e, "Failed to get Redis connection for event store");
            StoreError::Connection(e.to_string())
        })?;

        let payload = serde_json::to_string(&event.payload).map_err(|e| {
            error!(error = %e, "Failed to serialize event payload");
            StoreError::Serialization(e.to_string())
        })?;

        let id: String = cmd("XADD")
            .arg(&self.stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_len)
            .arg("*")
            .arg("key")
            .arg(&event.routing_key)
            .arg("value")
            .arg(&payload)
            .arg("receivedAt")
            .arg(event.received_at.as_deref().unwrap_or(""))
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!(error = %e, stream = %self.stream, "Failed to append event");
                StoreError::Command(e.to_string())
            })?;

        debug!(
            record_id = %id,
            routing_key = %event.routing_key,
            "Event persisted"
        );

        Ok(id)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let count: u64 = cmd("XLEN")
            .arg(&self.stream)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;

        Ok(count)
    }
}

/// In-process event store.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored events, oldest first.
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn store(&self, event: &Event) -> Result<RecordId, StoreError> {
        let mut events = self
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        events.push(event.clone());
        Ok(format!("mem-{}", events.len()))
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let events = self
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(events.len() as u64)
    }
}
