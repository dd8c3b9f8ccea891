//! Configuration for the audit pipeline.
//!
//! Each section maps to one table in the `footprint` config file. Optional
//! collaborators (`[index]`, `[broadcast]`) are `Option`s on the host side:
//! a missing table means the collaborator is not configured.

use std::time::Duration;

use footprint_iggy::BrokerConfig;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default per-subscriber bus capacity.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Default search index destination prefix.
pub const DEFAULT_INDEX_PREFIX: &str = "activity";

/// Default broadcast channel name.
pub const DEFAULT_BROADCAST_CHANNEL: &str = "activity-events";

/// Default number of recent events remembered for deduplication.
pub const DEFAULT_DEDUP_WINDOW: usize = 4096;

fn default_bus_capacity() -> usize {
    DEFAULT_BUS_CAPACITY
}

fn default_index_url() -> String {
    "http://127.0.0.1:9200".to_string()
}

fn default_index_prefix() -> String {
    DEFAULT_INDEX_PREFIX.to_string()
}

fn default_index_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_broadcast_channel() -> String {
    DEFAULT_BROADCAST_CHANNEL.to_string()
}

fn default_instance_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_dedup_window() -> usize {
    DEFAULT_DEDUP_WINDOW
}

/// `[bus]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Events buffered per subscriber before the oldest are dropped.
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

/// `[index]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Base URL of the document index.
    #[serde(default = "default_index_url")]
    pub url: String,

    /// Destination prefix; documents go to `{prefix}-YYYY-MM-DD`.
    #[serde(default = "default_index_prefix")]
    pub prefix: String,

    /// Per-request timeout.
    #[serde(default = "default_index_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: default_index_url(),
            prefix: default_index_prefix(),
            timeout: default_index_timeout(),
        }
    }
}

impl IndexConfig {
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// `[broadcast]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Channel shared by all instances.
    #[serde(default = "default_broadcast_channel")]
    pub channel: String,

    /// Identity of this instance on the channel. Random when not set.
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    /// Broker connection settings.
    #[serde(default)]
    pub broker: BrokerConfig,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            channel: default_broadcast_channel(),
            instance_id: default_instance_id(),
            broker: BrokerConfig::default(),
        }
    }
}

impl BroadcastConfig {
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    #[must_use]
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    #[must_use]
    pub fn with_broker(mut self, broker: BrokerConfig) -> Self {
        self.broker = broker;
        self
    }
}

/// What the sink consumer does with events received from peer instances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerEventPolicy {
    /// Write peer events to the local sinks as well.
    #[default]
    Replicate,
    /// Only the originating instance writes an event to its sinks.
    OriginOnly,
}

/// `[sinks]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub peer_events: PeerEventPolicy,

    /// Recent events remembered to drop redelivered copies. Zero disables.
    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            peer_events: PeerEventPolicy::default(),
            dedup_window: default_dedup_window(),
        }
    }
}

impl SinkConfig {
    #[must_use]
    pub fn with_peer_events(mut self, policy: PeerEventPolicy) -> Self {
        self.peer_events = policy;
        self
    }

    #[must_use]
    pub fn with_dedup_window(mut self, window: usize) -> Self {
        self.dedup_window = window;
        self
    }
}
