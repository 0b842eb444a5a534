//! Engine configuration.

use serde::Deserialize;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default gossip topic for announcements.
pub const DEFAULT_TOPIC: &str = "/pando/v0.0.1";

/// Configuration errors, reported before any component starts.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown publisher kind: {0}")]
    UnknownPublisherKind(String),

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Which announcement transport the engine uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum PublisherKind {
    /// Advertisements are only stored locally.
    #[default]
    Disabled,
    /// Broadcast the latest root on a gossip topic.
    Gossip,
    /// Serve the latest root over HTTP for peers to pull.
    Http,
}

impl FromStr for PublisherKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "disabled" => Ok(PublisherKind::Disabled),
            "gossip" | "dtsync" => Ok(PublisherKind::Gossip),
            "http" | "httpsync" => Ok(PublisherKind::Http),
            other => Err(ConfigError::UnknownPublisherKind(other.to_string())),
        }
    }
}

impl TryFrom<String> for PublisherKind {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::fmt::Display for PublisherKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PublisherKind::Disabled => "disabled",
            PublisherKind::Gossip => "gossip",
            PublisherKind::Http => "http",
        };
        f.write_str(name)
    }
}

/// Configuration for the publish engine.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Identity of this node, recorded in every advertisement.
    pub provider_id: String,
    pub publisher_kind: PublisherKind,
    /// Gossip topic used by the gossip publisher.
    pub topic: String,
    /// Extra data attached to every gossip announcement.
    pub extra_gossip_data: Option<String>,
    /// Listen address of the HTTP publisher.
    pub http_listen_addr: Option<SocketAddr>,
    /// Base URL of the remote index API.
    pub index_url: Option<String>,
    /// Timeout for a single remote index request (in milliseconds).
    pub index_timeout_ms: u64,
    /// How often pending advertisements are checked (in milliseconds).
    pub check_interval_ms: u64,
    /// Deadline for a cache-miss fetch from the upstream (in milliseconds).
    pub cat_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider_id: String::new(),
            publisher_kind: PublisherKind::Disabled,
            topic: DEFAULT_TOPIC.to_string(),
            extra_gossip_data: None,
            http_listen_addr: None,
            index_url: None,
            index_timeout_ms: 10_000,
            check_interval_ms: 60_000,
            cat_timeout_ms: 15_000,
        }
    }
}

impl EngineConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn cat_timeout(&self) -> Duration {
        Duration::from_millis(self.cat_timeout_ms)
    }

    pub fn index_timeout(&self) -> Duration {
        Duration::from_millis(self.index_timeout_ms)
    }

    /// Check the settings the selected publisher kind depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider_id.is_empty() {
            return Err(ConfigError::Missing("provider_id"));
        }
        if self.check_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "check_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        match self.publisher_kind {
            PublisherKind::Disabled => {}
            PublisherKind::Gossip if self.topic.is_empty() => {
                return Err(ConfigError::Missing("topic"));
            }
            PublisherKind::Gossip => {}
            PublisherKind::Http if self.http_listen_addr.is_none() => {
                return Err(ConfigError::Missing("http_listen_addr"));
            }
            PublisherKind::Http => {}
        }
        Ok(())
    }
}

/// Builder for engine configuration.
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn provider_id(mut self, id: impl Into<String>) -> Self {
        self.config.provider_id = id.into();
        self
    }

    pub fn publisher_kind(mut self, kind: PublisherKind) -> Self {
        self.config.publisher_kind = kind;
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.config.topic = topic.into();
        self
    }

    pub fn extra_gossip_data(mut self, data: impl Into<String>) -> Self {
        self.config.extra_gossip_data = Some(data.into());
        self
    }

    pub fn http_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.config.http_listen_addr = Some(addr);
        self
    }

    pub fn index_url(mut self, url: impl Into<String>) -> Self {
        self.config.index_url = Some(url.into());
        self
    }

    pub fn index_timeout(mut self, ms: u64) -> Self {
        self.config.index_timeout_ms = ms;
        self
    }

    pub fn check_interval(mut self, ms: u64) -> Self {
        self.config.check_interval_ms = ms;
        self
    }

    pub fn cat_timeout(mut self, ms: u64) -> Self {
        self.config.cat_timeout_ms = ms;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
