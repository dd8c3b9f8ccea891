use super::types::{
    FootprintConfig, RawBusConfig, RawFootprintConfig, RawServerConfig, RawSinkConfig,
    RawStoreConfig,
};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project + explicit)
    pub fn load(explicit: Option<&Path>) -> Result<FootprintConfig> {
        let mut layers = Vec::new();

        // Layer 1: User config
        if let Some(user_path) = Self::user_config_path()
            && user_path.exists()
        {
            layers.push(user_path);
        }

        // Layer 2: Project config
        let project_path = Self::project_config_path();
        if project_path.exists() {
            layers.push(project_path);
        }

        // Layer 3: --config, which must exist
        if let Some(path) = explicit {
            if !path.exists() {
                anyhow::bail!("config file not found: {}", path.display());
            }
            layers.push(path.to_path_buf());
        }

        Self::load_layers(&layers)
    }

    /// Merge the given files in order, later files overriding earlier ones
    pub fn load_layers(paths: &[PathBuf]) -> Result<FootprintConfig> {
        let mut raw = RawFootprintConfig::default();

        for path in paths {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: RawFootprintConfig = toml::from_str(&contents)
                .with_context(|| format!("parsing {}", path.display()))?;
            tracing::debug!(path = %path.display(), "loaded config layer");
            raw = Self::merge_raw(raw, layer);
        }

        Ok(raw.into())
    }

    /// Get user config path (platform-specific)
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "footprint").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get project config path
    /// Can be overridden with FOOTPRINT_PROJECT_CONFIG_DIR env var
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("FOOTPRINT_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".footprint/config.toml")
        }
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawFootprintConfig, overlay: RawFootprintConfig) -> RawFootprintConfig {
        RawFootprintConfig {
            server: RawServerConfig {
                host: overlay.server.host.or(base.server.host),
                port: overlay.server.port.or(base.server.port),
                actor_header: overlay.server.actor_header.or(base.server.actor_header),
            },
            bus: RawBusConfig {
                capacity: overlay.bus.capacity.or(base.bus.capacity),
            },
            store: RawStoreConfig {
                path: overlay.store.path.or(base.store.path),
            },
            index: overlay.index.or(base.index),
            broadcast: overlay.broadcast.or(base.broadcast),
            sinks: RawSinkConfig {
                peer_events: overlay.sinks.peer_events.or(base.sinks.peer_events),
                dedup_window: overlay.sinks.dedup_window.or(base.sinks.dedup_window),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use footprint_core::PeerEventPolicy;
    use serial_test::serial;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_no_layers_returns_defaults() {
        let config = ConfigLoader::load_layers(&[]).unwrap();
        assert_eq!(config, FootprintConfig::default());
    }

    #[test]
    fn test_later_layer_overrides_earlier() {
        let dir = TempDir::new().unwrap();
        let user = write(
            &dir,
            "user.toml",
            r#"
[server]
host = "0.0.0.0"
port = 9000

[sinks]
dedup_window = 16
"#,
        );
        let project = write(
            &dir,
            "project.toml",
            r#"
[server]
port = 9100

[sinks]
peer_events = "origin_only"
"#,
        );

        let config = ConfigLoader::load_layers(&[user, project]).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.sinks.dedup_window, 16);
        assert_eq!(config.sinks.peer_events, PeerEventPolicy::OriginOnly);
    }

    #[test]
    fn test_optional_sections_survive_layers_that_omit_them() {
        let dir = TempDir::new().unwrap();
        let user = write(
            &dir,
            "user.toml",
            r#"
[broadcast]
channel = "audit"
instance_id = "node-a"
"#,
        );
        let project = write(&dir, "project.toml", "[bus]\ncapacity = 64\n");

        let config = ConfigLoader::load_layers(&[user, project]).unwrap();

        let broadcast = config.broadcast.unwrap();
        assert_eq!(broadcast.channel, "audit");
        assert_eq!(broadcast.instance_id, "node-a");
        assert_eq!(config.bus.capacity, 64);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "invalid.toml", "this is not valid toml {{");

        assert!(ConfigLoader::load_layers(&[path]).is_err());
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml");

        let result = ConfigLoader::load(Some(&missing));
        assert!(result.is_err());
    }

    #[test]
    fn test_user_config_path_returns_some() {
        let path = ConfigLoader::user_config_path().unwrap();
        assert!(path.to_string_lossy().contains("footprint"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    #[serial]
    fn test_project_config_path_default() {
        // SAFETY: serialized with the other env-mutating tests
        unsafe { std::env::remove_var("FOOTPRINT_PROJECT_CONFIG_DIR") };
        let path = ConfigLoader::project_config_path();
        assert_eq!(path, PathBuf::from(".footprint/config.toml"));
    }

    #[test]
    #[serial]
    fn test_project_config_dir_override() {
        let dir = TempDir::new().unwrap();
        write(&dir, "config.toml", "[server]\nactor_header = \"x-user\"\n");

        // SAFETY: serialized with the other env-mutating tests
        unsafe { std::env::set_var("FOOTPRINT_PROJECT_CONFIG_DIR", dir.path()) };
        let path = ConfigLoader::project_config_path();
        let config = ConfigLoader::load(None);
        unsafe { std::env::remove_var("FOOTPRINT_PROJECT_CONFIG_DIR") };

        assert_eq!(path, dir.path().join("config.toml"));
        assert_eq!(config.unwrap().server.actor_header, "x-user");
    }
}
