// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge configuration.
//!
//! Built from the command line or loaded from a TOML file:
//!
//! ```toml
//! host = "tcp://broker.local:1883"
//! output = "capture.mcap"
//! stamp_property = "ts"
//!
//! [[topics]]
//! pattern = "sensors/+"
//! encoding = "json"
//!
//! [[topics]]
//! pattern = "logs/#"
//! ```

use crate::broker::QoS;
use crate::channel::EncodingPolicy;
use crate::connection::RetryPolicy;
use crate::writer::{Compression, WriterConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default MQTT port.
pub const DEFAULT_PORT: u16 = 1883;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid broker URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A subscription pattern and the encoding declared for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicPattern {
    /// MQTT topic filter, wildcards allowed.
    pub pattern: String,

    /// Message encoding recorded on channels created through this pattern.
    #[serde(default)]
    pub encoding: String,
}

impl TopicPattern {
    pub fn new(pattern: impl Into<String>, encoding: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            encoding: encoding.into(),
        }
    }
}

impl FromStr for TopicPattern {
    type Err = ConfigError;

    /// Parse `pattern[:encoding]`, splitting at the first `:`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (pattern, encoding) = s.split_once(':').unwrap_or((s, ""));
        if pattern.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "empty topic pattern in '{}'",
                s
            )));
        }
        Ok(Self::new(pattern, encoding))
    }
}

/// Broker host and port parsed from a URL such as `tcp://localhost:1883`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    /// Parse `[tcp://|mqtt://]host[:port]`. Bracketed IPv6 hosts are accepted.
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let rest = match url.split_once("://") {
            Some(("tcp" | "mqtt", rest)) => rest,
            Some((scheme, _)) => {
                return Err(invalid(&format!("unsupported scheme '{}'", scheme)));
            }
            None => url,
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated '['"))?;
            match tail {
                "" => (host, None),
                _ => match tail.strip_prefix(':') {
                    Some(port) => (host, Some(port)),
                    None => return Err(invalid("unexpected characters after ']'")),
                },
            }
        } else {
            match rest.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| invalid(&format!("invalid port '{}'", port)))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Broker URL.
    #[serde(default = "default_host")]
    pub host: String,

    /// Output MCAP path.
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Patterns to subscribe to, in subscription order.
    #[serde(default)]
    pub topics: Vec<TopicPattern>,

    /// User property holding the log time in nanoseconds. Empty = wall clock.
    #[serde(default)]
    pub stamp_property: String,

    /// MQTT client identifier.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Subscription QoS.
    #[serde(default)]
    pub qos: QoS,

    /// MCAP chunk compression.
    #[serde(default)]
    pub compression: Compression,

    /// Handling of encoding changes on an existing channel.
    #[serde(default)]
    pub encoding_policy: EncodingPolicy,

    /// MQTT keep-alive (seconds).
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Per-attempt connection timeout (milliseconds).
    #[serde(default = "default_interval_ms")]
    pub connect_timeout_ms: u64,

    /// Delay between connection attempts (milliseconds).
    #[serde(default = "default_interval_ms")]
    pub retry_interval_ms: u64,

    /// Upper bound on a single inbound queue poll (milliseconds).
    #[serde(default = "default_interval_ms")]
    pub poll_timeout_ms: u64,

    /// Statistics reporting interval (seconds, 0 = disabled).
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

fn default_host() -> String {
    "tcp://localhost:1883".to_string()
}

fn default_output() -> PathBuf {
    PathBuf::from("output.mcap")
}

fn default_client_id() -> String {
    "mqtt_mcap".to_string()
}

fn default_keep_alive_secs() -> u64 {
    10
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_stats_interval() -> u64 {
    10
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            output: default_output(),
            topics: Vec::new(),
            stamp_property: String::new(),
            client_id: default_client_id(),
            qos: QoS::default(),
            compression: Compression::default(),
            encoding_policy: EncodingPolicy::default(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_ms: default_interval_ms(),
            retry_interval_ms: default_interval_ms(),
            poll_timeout_ms: default_interval_ms(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

impl BridgeConfig {
    /// Create a config writing to `output` with defaults elsewhere.
    pub fn new<P: AsRef<Path>>(output: P) -> Self {
        Self {
            output: output.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Load and validate a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content)?;
        let topics = std::mem::take(&mut config.topics);
        config = config.topics(topics);
        config.validate()?;
        Ok(config)
    }

    /// Set broker URL.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Add a pattern. A pattern already present keeps its first encoding.
    pub fn topic(mut self, topic: TopicPattern) -> Self {
        if let Some(existing) = self.topics.iter().find(|t| t.pattern == topic.pattern) {
            tracing::warn!(
                "Ignoring duplicate pattern '{}:{}' (already declared with encoding '{}')",
                topic.pattern,
                topic.encoding,
                existing.encoding
            );
        } else {
            self.topics.push(topic);
        }
        self
    }

    /// Add several patterns.
    pub fn topics(self, topics: impl IntoIterator<Item = TopicPattern>) -> Self {
        topics.into_iter().fold(self, Self::topic)
    }

    /// Set the timestamp property.
    pub fn stamp_property(mut self, name: impl Into<String>) -> Self {
        self.stamp_property = name.into();
        self
    }

    /// Set the MQTT client id.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    /// Set subscription QoS.
    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Set chunk compression.
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set encoding drift policy.
    pub fn encoding_policy(mut self, policy: EncodingPolicy) -> Self {
        self.encoding_policy = policy;
        self
    }

    /// Set connect timeout and retry interval.
    pub fn retry(mut self, connect_timeout: Duration, interval: Duration) -> Self {
        self.connect_timeout_ms = connect_timeout.as_millis() as u64;
        self.retry_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the inbound poll timeout.
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set statistics interval (0 disables).
    pub fn stats_interval_secs(mut self, secs: u64) -> Self {
        self.stats_interval_secs = secs;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topics.is_empty() {
            return Err(ConfigError::Invalid("No topics configured".into()));
        }

        if let Some(topic) = self.topics.iter().find(|t| t.pattern.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "Empty topic pattern (encoding '{}')",
                topic.encoding
            )));
        }

        if self.client_id.is_empty() {
            return Err(ConfigError::Invalid("Empty client id".into()));
        }

        if self.output.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("Empty output path".into()));
        }

        for (name, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("retry_interval_ms", self.retry_interval_ms),
            ("poll_timeout_ms", self.poll_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }

        self.broker_address()?;
        Ok(())
    }

    /// Parsed broker address.
    pub fn broker_address(&self) -> Result<BrokerAddress, ConfigError> {
        BrokerAddress::parse(&self.host)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn poll_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Statistics interval, `None` when disabled.
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }

    /// Connection retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempt_timeout: Duration::from_millis(self.connect_timeout_ms),
            interval: Duration::from_millis(self.retry_interval_ms),
        }
    }

    /// Output settings, including the `recording` metadata entries.
    pub fn writer_config(&self) -> WriterConfig {
        let patterns = self
            .topics
            .iter()
            .map(|t| format!("{}:{}", t.pattern, t.encoding))
            .collect::<Vec<_>>()
            .join(",");

        WriterConfig::new(&self.output)
            .compression(self.compression)
            .metadata("host", &self.host)
            .metadata("topics", patterns)
            .metadata("stamp_property", &self.stamp_property)
            .metadata("start_time", chrono::Utc::now().to_rfc3339())
            .metadata("recorder", concat!("mqtt-mcap ", env!("CARGO_PKG_VERSION")))
    }
}
