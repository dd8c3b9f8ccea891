use std::path::PathBuf;

use footprint_core::{BroadcastConfig, BusConfig, IndexConfig, PeerEventPolicy, SinkConfig};
use footprint_server::config::{DEFAULT_ACTOR_HEADER, DEFAULT_HOST, DEFAULT_PORT};
use footprint_server::{PipelineConfig, ServerConfig, StoreConfig};
use serde::{Deserialize, Serialize};

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawFootprintConfig {
    #[serde(default)]
    pub server: RawServerConfig,

    #[serde(default)]
    pub bus: RawBusConfig,

    #[serde(default)]
    pub store: RawStoreConfig,

    /// Replaced as a whole by the layer that sets it
    #[serde(default)]
    pub index: Option<IndexConfig>,

    /// Replaced as a whole by the layer that sets it
    #[serde(default)]
    pub broadcast: Option<BroadcastConfig>,

    #[serde(default)]
    pub sinks: RawSinkConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub actor_header: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawBusConfig {
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawStoreConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawSinkConfig {
    pub peer_events: Option<PeerEventPolicy>,
    pub dedup_window: Option<usize>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FootprintConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<BroadcastConfig>,

    #[serde(default)]
    pub sinks: SinkConfig,
}

impl FootprintConfig {
    /// The part of the configuration the audit pipeline is started from
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            bus: self.bus.clone(),
            store: self.store.clone(),
            index: self.index.clone(),
            broadcast: self.broadcast.clone(),
            sinks: self.sinks.clone(),
        }
    }
}

impl From<RawFootprintConfig> for FootprintConfig {
    fn from(raw: RawFootprintConfig) -> Self {
        let sinks = SinkConfig::default();
        Self {
            server: ServerConfig {
                host: raw.server.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: raw.server.port.unwrap_or(DEFAULT_PORT),
                actor_header: raw
                    .server
                    .actor_header
                    .unwrap_or_else(|| DEFAULT_ACTOR_HEADER.to_string()),
            },
            bus: match raw.bus.capacity {
                Some(capacity) => BusConfig { capacity },
                None => BusConfig::default(),
            },
            store: StoreConfig {
                path: raw.store.path,
            },
            index: raw.index,
            broadcast: raw.broadcast,
            sinks: SinkConfig {
                peer_events: raw.sinks.peer_events.unwrap_or(sinks.peer_events),
                dedup_window: raw.sinks.dedup_window.unwrap_or(sinks.dedup_window),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = FootprintConfig::default();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.server.actor_header, "x-actor-id");
        assert!(config.store.path.is_none());
        assert!(config.index.is_none());
        assert!(config.broadcast.is_none());
    }

    #[test]
    fn test_raw_config_partial_parsing() {
        let toml_str = r#"
[server]
port = 9000

[sinks]
peer_events = "origin_only"
"#;
        let raw: RawFootprintConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(raw.server.port, Some(9000));
        assert!(raw.server.host.is_none());
        assert_eq!(raw.sinks.peer_events, Some(PeerEventPolicy::OriginOnly));
        assert!(raw.sinks.dedup_window.is_none());
        assert!(raw.index.is_none());
    }

    #[test]
    fn test_raw_config_empty_uses_none() {
        let raw: RawFootprintConfig = toml::from_str("").unwrap();

        assert!(raw.server.port.is_none());
        assert!(raw.bus.capacity.is_none());
        assert!(raw.store.path.is_none());
    }

    #[test]
    fn test_index_section_enables_index() {
        let raw: RawFootprintConfig = toml::from_str(
            r#"
[index]
url = "http://search:9200"
timeout = "2s"
"#,
        )
        .unwrap();
        let config = FootprintConfig::from(raw);

        let index = config.index.unwrap();
        assert_eq!(index.url, "http://search:9200");
        assert_eq!(index.prefix, "activity");
        assert_eq!(index.timeout, std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = FootprintConfig {
            store: StoreConfig {
                path: Some(PathBuf::from("/var/lib/footprint/activity.db")),
            },
            index: Some(IndexConfig::default().with_prefix("audit")),
            broadcast: Some(BroadcastConfig::default().with_instance_id("node-a")),
            ..Default::default()
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: FootprintConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed, config);
    }

    #[test]
    fn test_pipeline_carries_sections() {
        let config = FootprintConfig {
            bus: BusConfig { capacity: 8 },
            ..Default::default()
        };

        let pipeline = config.pipeline();
        assert_eq!(pipeline.bus.capacity, 8);
        assert!(pipeline.index.is_none());
    }
}
