//! Core event types for Notifilter.
//!
//! An [`Event`] is one ingested occurrence: a routing key naming the entity
//! or class that produced it, and a [`Payload`] document that notifier rules
//! are evaluated against and templates draw their fields from.
//!
//! # Wire format
//!
//! Producers fire-and-forget a JSON datagram:
//!
//! ```json
//! {
//!   "key": "User",
//!   "value": { "name": "Go", "active": true, "number": "12" }
//! }
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors produced while decoding a raw ingested buffer.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The buffer is not valid JSON or lacks `key`/`value`
    #[error("malformed event: {0}")]
    Json(#[from] serde_json::Error),

    /// `key` was present but empty
    #[error("event has an empty routing key")]
    EmptyRoutingKey,
}

/// The semi-structured document carried by an event.
///
/// Always a mapping of string keys to JSON values. Accessors are explicit and
/// fallible; a `null` field reads the same as an absent one through
/// [`Payload::field`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Build a payload from an arbitrary JSON value; only objects qualify.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Raw lookup of a top-level key, `null` included.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Top-level field that is present and not `null`.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// Walk a path of object keys and array indices into the payload.
    pub fn lookup<'a, I>(&self, path: I) -> Option<&Value>
    where
        I: IntoIterator<Item = PathSegment<'a>>,
    {
        let mut segments = path.into_iter();
        let mut current = match segments.next()? {
            PathSegment::Key(key) => self.0.get(key)?,
            PathSegment::Index(_) => return None,
        };

        for segment in segments {
            current = match (segment, current) {
                (PathSegment::Key(key), Value::Object(map)) => map.get(key)?,
                (PathSegment::Index(i), Value::Array(items)) => items.get(i)?,
                _ => return None,
            };
        }

        Some(current)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// One step of a field path: `user.name` or `items[0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSegment<'a> {
    Key(&'a str),
    Index(usize),
}

/// An event flowing through Notifilter.
///
/// Constructed once at decode time and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Originating entity/class, matched against notifier classes
    #[serde(rename = "key")]
    pub routing_key: String,

    /// Data the rules are evaluated against
    #[serde(rename = "value")]
    pub payload: Payload,

    /// RFC 3339 receive time (set on decode)
    #[serde(rename = "receivedAt", default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<String>,
}

impl Event {
    /// Create a new event with required fields
    pub fn new(routing_key: impl Into<String>, payload: Payload) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload,
            received_at: None,
        }
    }

    /// Set the receive timestamp
    pub fn with_received_at(mut self, timestamp: impl Into<String>) -> Self {
        self.received_at = Some(timestamp.into());
        self
    }

    /// Decode a raw datagram into an event, stamping the receive time.
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let event: Event = serde_json::from_slice(raw)?;

        if event.routing_key.is_empty() {
            return Err(DecodeError::EmptyRoutingKey);
        }

        Ok(event.with_received_at(Utc::now().to_rfc3339()))
    }
}
