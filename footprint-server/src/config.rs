//! Server and pipeline configuration

use std::path::PathBuf;

use footprint_core::{BroadcastConfig, BusConfig, IndexConfig, SinkConfig};
use serde::{Deserialize, Serialize};

/// Default port for the footprint server
pub const DEFAULT_PORT: u16 = 7433;

/// Default host for the footprint server
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default request header carrying the actor id
pub const DEFAULT_ACTOR_HEADER: &str = "x-actor-id";

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_actor_header() -> String {
    DEFAULT_ACTOR_HEADER.to_string()
}

/// `[server]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request header the actor id is read from
    #[serde(default = "default_actor_header")]
    pub actor_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            actor_header: default_actor_header(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `[store]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// libSQL database file. In-memory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Everything the audit pipeline needs at startup.
///
/// `index` and `broadcast` are optional collaborators: absent means the
/// pipeline runs without them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.addr(), "127.0.0.1:7433");
        assert_eq!(config.actor_header, "x-actor-id");
    }

    #[test]
    fn pipeline_defaults_have_no_optional_collaborators() {
        let config = PipelineConfig::default();
        assert!(config.store.path.is_none());
        assert!(config.index.is_none());
        assert!(config.broadcast.is_none());
        assert_eq!(config.bus.capacity, 1024);
    }

    #[test]
    fn pipeline_parses_from_json() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{
                "store": {"path": "/var/lib/footprint/activity.db"},
                "index": {"url": "http://search:9200"},
                "sinks": {"peer_events": "origin_only"}
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.store.path,
            Some(PathBuf::from("/var/lib/footprint/activity.db"))
        );
        assert_eq!(config.index.unwrap().prefix, "activity");
        assert!(config.broadcast.is_none());
    }
}
