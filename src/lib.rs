//! # Notifilter
//!
//! A lightweight alerting gateway. Producers fire-and-forget JSON events over
//! UDP; operators register notifiers describing which events should produce a
//! message, what it should say and where it should go.
//!
//! ## Architecture
//!
//! ```text
//! UDP -> queue -> Pipeline: decode -> persist -> rules -> template -> channel
//!                              \-> search index (optional)
//! ```
//!
//! ## Modules
//!
//! - [`event`]: event envelope and payload
//! - [`rules`]: typed predicates over payload fields
//! - [`notifier`]: notifiers and the snapshot-read registry
//! - [`template`]: message templates with field substitution and conditionals
//! - [`channels`]: channel trait, dispatcher and built-in channels
//! - [`store`] / [`search`]: persistence and search-index capabilities
//! - [`pipeline`]: the per-event dispatch pass
//! - [`ingest`]: UDP listener and pipeline worker
//! - [`admin`]: administrative HTTP surface
//! - [`config`]: TOML configuration

pub mod admin;
pub mod channels;
pub mod config;
pub mod event;
pub mod ingest;
pub mod notifier;
pub mod pipeline;
pub mod rules;
pub mod search;
pub mod shutdown;
pub mod store;
pub mod template;

pub use channels::{Channel, ChannelDispatcher, ChannelError, ChannelKind, SendReceipt};
pub use event::{Event, Payload};
pub use notifier::{Notifier, NotifierRegistry};
pub use pipeline::{PassReport, Pipeline, PipelineError};
pub use rules::{Operator, Rule, RuleType};
pub use template::{render, Template};
