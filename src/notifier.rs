//! Notifiers and the registry that holds them.
//!
//! A [`Notifier`] binds a routing class, an ordered rule set, a message
//! template and a channel kind. It fires for an event when the event's
//! routing key equals its class and every rule is met (an empty rule set
//! always fires).
//!
//! The [`NotifierRegistry`] is read by every pipeline pass and written
//! rarely by the admin surface. Reads hand out an `Arc` snapshot, so a pass
//! sees one consistent list no matter what is written meanwhile.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::channels::ChannelKind;
use crate::event::Event;
use crate::rules::Rule;

/// A registered rule set bound to a template and a delivery channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notifier {
    /// Assigned by the registry; `0` until registered
    #[serde(default)]
    id: u64,

    /// Routing key this notifier applies to
    #[serde(rename = "class", alias = "routing_class")]
    routing_class: String,

    #[serde(rename = "channel", alias = "notification_type")]
    channel: ChannelKind,

    template: String,

    #[serde(default)]
    rules: Vec<Rule>,
}

impl Notifier {
    pub fn new(
        routing_class: impl Into<String>,
        channel: ChannelKind,
        template: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            routing_class: routing_class.into(),
            channel,
            template: template.into(),
            rules: Vec::new(),
        }
    }

    pub fn with_rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn routing_class(&self) -> &str {
        &self.routing_class
    }

    pub fn channel(&self) -> &ChannelKind {
        &self.channel
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Whether this notifier is meant for the event's routing key.
    pub fn applies_to(&self, event: &Event) -> bool {
        self.routing_class == event.routing_key
    }

    /// AND of all rules against the event payload; stops at the first unmet
    /// rule. Routing is not checked here, see [`Notifier::applies_to`].
    pub fn matches(&self, event: &Event) -> bool {
        self.rules.iter().all(|rule| rule.is_met(&event.payload))
    }
}

/// Shared, snapshot-read collection of notifiers.
pub struct NotifierRegistry {
    notifiers: RwLock<Arc<Vec<Notifier>>>,
    next_id: AtomicU64,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self {
            notifiers: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Build a registry, assigning ids to every notifier in order.
    pub fn from_notifiers(notifiers: Vec<Notifier>) -> Self {
        let registry = Self::new();
        registry.replace_all(notifiers);
        registry
    }

    /// Consistent view of the current notifiers.
    pub fn snapshot(&self) -> Arc<Vec<Notifier>> {
        let guard = self
            .notifiers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Register a notifier and return it with its assigned id.
    pub fn insert(&self, mut notifier: Notifier) -> Notifier {
        notifier.id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut guard = self
            .notifiers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(notifier.clone());
        *guard = Arc::new(next);

        info!(
            notifier_id = notifier.id,
            class = %notifier.routing_class,
            channel = %notifier.channel,
            rules = notifier.rules.len(),
            "Notifier registered"
        );

        notifier
    }

    /// Replace the whole set, assigning fresh ids.
    pub fn replace_all(&self, notifiers: Vec<Notifier>) {
        let notifiers: Vec<Notifier> = notifiers
            .into_iter()
            .map(|mut n| {
                n.id = self.next_id.fetch_add(1, Ordering::Relaxed);
                n
            })
            .collect();

        debug!(count = notifiers.len(), "Replacing notifier set");

        let mut guard = self
            .notifiers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(notifiers);
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

impl Default for NotifierRegistry {
    fn default() -> Self {
        Self::new()
    }
}
