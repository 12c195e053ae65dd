//! Configuration loading.
//!
//! Reads a TOML file with `${VAR}` environment substitution. A missing file
//! yields the defaults (UDP on `0.0.0.0:8000`, admin on `0.0.0.0:8001`,
//! Redis on localhost, no channels configured and no notifiers).
//!
//! # Example
//!
//! ```toml
//! [listener]
//! bind = "0.0.0.0:8000"
//!
//! [channels.chat]
//! url = "${CHAT_WEBHOOK_URL}"
//!
//! [[notifiers]]
//! class = "User"
//! channel = "chat"
//! template = "{{ .name }} signed up"
//! rules = [{ key = "active", type = "boolean", value = "true" }]
//! ```

use regex::Regex;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::channels::{ChannelDispatcher, ChannelKind, ChatChannel, EmailChannel};
use crate::ingest::{DEFAULT_MAX_PACKET_SIZE, DEFAULT_QUEUE_CAPACITY};
use crate::notifier::{Notifier, NotifierRegistry};
use crate::search::{ElasticsearchIndex, SearchIndex, DEFAULT_INDEX_NAME};
use crate::shutdown::DEFAULT_SHUTDOWN_TIMEOUT_SECS;
use crate::store::{
    EventStore, MemoryEventStore, RedisEventStore, StoreError, DEFAULT_MAX_LEN,
    DEFAULT_STREAM_NAME,
};
use crate::template::Template;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NotifilterConfig {
    #[serde(default)]
    pub listener: ListenerConfig,

    #[serde(default)]
    pub admin: AdminConfig,

    #[serde(default)]
    pub store: StoreConfig,

    /// Optional search index for observability
    #[serde(default)]
    pub search: Option<SearchConfig>,

    #[serde(default)]
    pub channels: ChannelsConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Notifiers registered at startup
    #[serde(default)]
    pub notifiers: Vec<Notifier>,
}

/// UDP listener configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ListenerConfig {
    #[serde(default = "default_listener_bind")]
    pub bind: String,

    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: default_listener_bind(),
            max_packet_size: default_max_packet_size(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_listener_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_max_packet_size() -> usize {
    DEFAULT_MAX_PACKET_SIZE
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

/// Admin HTTP configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AdminConfig {
    #[serde(default = "default_admin_bind")]
    pub bind: String,

    /// Bearer token required on write routes; open when unset
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            bind: default_admin_bind(),
            api_key: None,
        }
    }
}

fn default_admin_bind() -> String {
    "0.0.0.0:8001".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    Memory,
}

/// Event store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_stream")]
    pub stream: String,

    #[serde(default = "default_max_len")]
    pub max_len: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            stream: default_stream(),
            max_len: default_max_len(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_stream() -> String {
    DEFAULT_STREAM_NAME.to_string()
}

fn default_max_len() -> usize {
    DEFAULT_MAX_LEN
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    pub url: String,

    #[serde(default = "default_index")]
    pub index: String,
}

fn default_index() -> String {
    DEFAULT_INDEX_NAME.to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub email: Option<EmailConfig>,

    #[serde(default)]
    pub chat: Option<ChatConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmailConfig {
    pub from: String,
    pub to: String,

    /// `{routing_key}` is substituted per message
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    pub url: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_timeout_ms() -> u64 {
    10000
}

fn default_retries() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct ShutdownConfig {
    /// Seconds to let queued events drain after a termination signal
    #[serde(default = "default_shutdown_timeout")]
    pub timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_shutdown_timeout() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}

impl NotifilterConfig {
    /// Load from `NOTIFILTER_CONFIG` or `config/notifilter.toml`.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = env::var("NOTIFILTER_CONFIG")
            .unwrap_or_else(|_| "config/notifilter.toml".to_string());

        Self::load_from(&config_path)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        let config = Self::parse(&content)?;

        info!(
            notifiers = config.notifiers.len(),
            email = config.channels.email.is_some(),
            chat = config.channels.chat.is_some(),
            search = config.search.is_some(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Substitute, parse and validate TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content);

        debug!("Parsing TOML configuration");
        let mut config: NotifilterConfig = toml::from_str(&content)?;

        let unusable_key = config
            .admin
            .api_key
            .as_deref()
            .is_some_and(|key| key.trim().is_empty() || key.contains("${"));
        if unusable_key {
            warn!("admin.api_key is empty or unsubstituted, ignoring it");
            config.admin.api_key = None;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.listener.max_packet_size == 0 {
            return Err(ConfigError::ValidationError(
                "listener.max_packet_size must be positive".into(),
            ));
        }

        if self.listener.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "listener.queue_capacity must be positive".into(),
            ));
        }

        if let Some(email) = &self.channels.email {
            if email.from.trim().is_empty() || email.to.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "channels.email requires non-empty 'from' and 'to'".into(),
                ));
            }
        }

        if let Some(chat) = &self.channels.chat {
            if chat.url.contains("${") {
                warn!(
                    url = %chat.url,
                    "Chat URL contains unsubstituted environment variable"
                );
            } else if !is_http_url(&chat.url) {
                return Err(ConfigError::ValidationError(
                    "channels.chat URL must start with http:// or https://".into(),
                ));
            }
        }

        if let Some(search) = &self.search {
            if !is_http_url(&search.url) {
                return Err(ConfigError::ValidationError(
                    "search.url must start with http:// or https://".into(),
                ));
            }
        }

        for (position, notifier) in self.notifiers.iter().enumerate() {
            if let Err(e) = Template::parse(notifier.template()) {
                return Err(ConfigError::ValidationError(format!(
                    "notifier #{} ({}) has an invalid template: {}",
                    position + 1,
                    notifier.routing_class(),
                    e
                )));
            }

            if !self.channel_configured(notifier.channel()) {
                warn!(
                    class = %notifier.routing_class(),
                    channel = %notifier.channel(),
                    "Notifier references a channel without configuration, dispatch will fail"
                );
            }
        }

        Ok(())
    }

    fn channel_configured(&self, kind: &ChannelKind) -> bool {
        match kind {
            ChannelKind::Email => self.channels.email.is_some(),
            ChannelKind::Chat => self
                .channels
                .chat
                .as_ref()
                .is_some_and(|chat| !chat.url.contains("${")),
            ChannelKind::Null | ChannelKind::Other(_) => false,
        }
    }

    /// Register a channel for each configured section.
    ///
    /// The null channel is never registered here; notifiers that name it
    /// fail at dispatch with `UnknownChannel`.
    pub fn build_dispatcher(&self) -> ChannelDispatcher {
        let mut dispatcher = ChannelDispatcher::new();

        if let Some(email) = &self.channels.email {
            let mut channel = EmailChannel::new(&email.from, &email.to);
            if let Some(subject) = &email.subject {
                channel = channel.with_subject(subject);
            }
            dispatcher.register(Arc::new(channel));
        }

        if let Some(chat) = &self.channels.chat {
            if chat.url.contains("${") {
                warn!("Skipping chat channel with unsubstituted URL: {}", chat.url);
            } else {
                dispatcher.register(Arc::new(
                    ChatChannel::new(&chat.url)
                        .with_timeout(Duration::from_millis(chat.timeout_ms))
                        .with_retries(chat.retries),
                ));
            }
        }

        info!(channels = ?dispatcher.kinds(), "Channel dispatcher configured");
        dispatcher
    }

    pub fn build_registry(&self) -> NotifierRegistry {
        NotifierRegistry::from_notifiers(self.notifiers.clone())
    }

    pub fn build_store(&self) -> Result<Arc<dyn EventStore>, StoreError> {
        match self.store.backend {
            StoreBackend::Redis => Ok(Arc::new(RedisEventStore::connect(
                &self.store.redis_url,
                &self.store.stream,
                self.store.max_len,
            )?)),
            StoreBackend::Memory => {
                warn!("Using in-memory event store, events are not durable");
                Ok(Arc::new(MemoryEventStore::new()))
            }
        }
    }

    /// Search index and index name, when `[search]` is configured.
    pub fn build_search_index(&self) -> Option<(Arc<dyn SearchIndex>, String)> {
        self.search.as_ref().map(|search| {
            let index: Arc<dyn SearchIndex> = Arc::new(ElasticsearchIndex::new(&search.url));
            (index, search.index.clone())
        })
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown.timeout_secs)
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is valid")
    })
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    env_var_pattern()
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            match env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                    caps[0].to_string()
                }
            }
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Operator, RuleType};

    #[test]
    fn test_env_var_substitution() {
        env::set_var("NOTIFILTER_TEST_VAR", "substituted_value");
        let output = substitute_env_vars("url = \"${NOTIFILTER_TEST_VAR}\"");
        assert_eq!(output, "url = \"substituted_value\"");
        env::remove_var("NOTIFILTER_TEST_VAR");
    }

    #[test]
    fn test_env_var_not_set() {
        let input = "url = \"${NOTIFILTER_NONEXISTENT_VAR}\"";
        assert_eq!(substitute_env_vars(input), input);
    }

    #[test]
    fn test_default_config() {
        let config = NotifilterConfig::default();
        assert_eq!(config.listener.bind, "0.0.0.0:8000");
        assert_eq!(config.listener.max_packet_size, 1024 * 1024);
        assert_eq!(config.admin.bind, "0.0.0.0:8001");
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.stream, "notifilter:incoming");
        assert!(config.search.is_none());
        assert!(config.notifiers.is_empty());
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = NotifilterConfig::load_from("/nonexistent/notifilter.toml").unwrap();
        assert_eq!(config.listener.bind, "0.0.0.0:8000");
    }

    #[test]
    fn test_parse_full_config() {
        let config = NotifilterConfig::parse(
            r#"
            [listener]
            bind = "127.0.0.1:9000"
            queue_capacity = 8

            [admin]
            api_key = "secret"

            [store]
            backend = "memory"

            [search]
            url = "http://127.0.0.1:9200"

            [channels.email]
            from = "Notifilter <notifilter@example.com>"
            to = "dev@example.com"

            [channels.chat]
            url = "https://hooks.example.com/chat"
            retries = 3

            [[notifiers]]
            class = "User"
            channel = "email"
            template = "name: {{ .name }}"
            rules = [{ key = "number", type = "number", setting = "gt", value = "1" }]

            [[notifiers]]
            class = "Order"
            notification_type = "slack"
            template = "{{ if .paid }}paid{{ else }}open{{ end }}"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind, "127.0.0.1:9000");
        assert_eq!(config.listener.queue_capacity, 8);
        assert_eq!(config.admin.api_key.as_deref(), Some("secret"));
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.search.as_ref().unwrap().index, "notifilter");
        assert_eq!(config.channels.chat.as_ref().unwrap().retries, 3);
        assert_eq!(config.channels.chat.as_ref().unwrap().timeout_ms, 10000);

        assert_eq!(config.notifiers.len(), 2);
        let rule = &config.notifiers[0].rules()[0];
        assert_eq!(rule.rule_type(), RuleType::Number);
        assert_eq!(rule.operator(), Operator::GreaterThan);
        assert_eq!(config.notifiers[1].channel(), &ChannelKind::Chat);
    }

    #[test]
    fn test_build_dispatcher_and_registry() {
        let config = NotifilterConfig::parse(
            r#"
            [channels.email]
            from = "a@example.com"
            to = "b@example.com"

            [[notifiers]]
            class = "User"
            channel = "email"
            template = "x"

            [[notifiers]]
            class = "User"
            channel = "sms"
            template = "y"
            "#,
        )
        .unwrap();

        let dispatcher = config.build_dispatcher();
        assert!(dispatcher.is_registered(&ChannelKind::Email));
        assert!(!dispatcher.is_registered(&ChannelKind::Null));
        assert!(!dispatcher.is_registered(&ChannelKind::Chat));
        assert_eq!(dispatcher.kinds(), vec![&ChannelKind::Email]);

        let registry = config.build_registry();
        let ids: Vec<u64> = registry.snapshot().iter().map(|n| n.id()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_null_channel_notifier_fails_at_dispatch() {
        use crate::channels::DispatchError;
        use crate::pipeline::{NotifierError, Pipeline};

        let config = NotifilterConfig::parse(
            r#"
            [store]
            backend = "memory"

            [[notifiers]]
            class = "User"
            channel = "null"
            template = "x"
            "#,
        )
        .unwrap();
        assert!(!config.channel_configured(&ChannelKind::Null));

        let pipeline = Pipeline::new(
            config.build_store().unwrap(),
            Arc::new(config.build_registry()),
            Arc::new(config.build_dispatcher()),
        );

        for _ in 0..3 {
            let report = pipeline
                .process(br#"{"key": "User", "value": {}}"#)
                .await
                .unwrap();
            assert!(report.receipts.is_empty());
            assert!(matches!(
                report.failures[0].error,
                NotifierError::Dispatch(DispatchError::UnknownChannel(ChannelKind::Null))
            ));
        }

        let metrics = pipeline.metrics().snapshot();
        assert_eq!(metrics.dispatched, 0);
        assert_eq!(metrics.dispatch_failures, 3);
    }

    #[test]
    fn test_unsubstituted_chat_url_is_skipped() {
        let config = NotifilterConfig::parse(
            r#"
            [channels.chat]
            url = "${NOTIFILTER_UNSET_CHAT_URL}"
            "#,
        )
        .unwrap();

        assert!(!config.build_dispatcher().is_registered(&ChannelKind::Chat));
    }

    #[tokio::test]
    async fn test_build_memory_store() {
        let config = NotifilterConfig::parse("[store]\nbackend = \"memory\"").unwrap();
        let store = config.build_store().unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[test]
    fn test_validation_invalid_chat_url() {
        let result = NotifilterConfig::parse(
            r#"
            [channels.chat]
            url = "not-a-url"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validation_empty_email_target() {
        let result = NotifilterConfig::parse(
            r#"
            [channels.email]
            from = "a@example.com"
            to = " "
            "#,
        );
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validation_invalid_template() {
        let result = NotifilterConfig::parse(
            r#"
            [[notifiers]]
            class = "User"
            channel = "null"
            template = "{{ if .active }}unterminated"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_malformed_rule_rejected_at_parse() {
        let result = NotifilterConfig::parse(
            r#"
            [[notifiers]]
            class = "User"
            channel = "null"
            template = "x"
            rules = [{ key = "active", type = "boolean", setting = "gt", value = "true" }]
            "#,
        );
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_unsubstituted_api_key_is_ignored() {
        let config =
            NotifilterConfig::parse("[admin]\napi_key = \"${NOTIFILTER_UNSET_API_KEY}\"").unwrap();
        assert!(config.admin.api_key.is_none());
    }

    #[test]
    fn test_sample_config_parses() {
        let content = include_str!("../config/notifilter.toml");
        let config = NotifilterConfig::parse(content).unwrap();
        assert_eq!(config.notifiers.len(), 2);
    }

    #[test]
    fn test_zero_queue_capacity_rejected() {
        let result = NotifilterConfig::parse("[listener]\nqueue_capacity = 0");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }
}
