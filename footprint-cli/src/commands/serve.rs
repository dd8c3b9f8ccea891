//! Serve command: runs the records API with the audit pipeline attached

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use footprint_server::FootprintServer;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{ConfigLoader, FootprintConfig};

/// Arguments for the serve command
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Host to bind to (overrides config)
    #[arg(long)]
    pub host: Option<String>,

    /// Extra config file layered over user and project config
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl ServeArgs {
    fn apply(&self, config: &mut FootprintConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
    }
}

/// Run the serve command
pub async fn run(args: ServeArgs) -> Result<()> {
    let mut config = ConfigLoader::load(args.config.as_deref())?;
    args.apply(&mut config);

    info!(
        "Starting footprint server on {}:{}",
        config.server.host, config.server.port
    );
    if config.index.is_none() {
        info!("no [index] configured, activity goes to the primary store only");
    }

    let server = FootprintServer::start(config.server.clone(), &config.pipeline()).await?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for ctrl-c: {}", e);
            return;
        }
        info!("Shutting down");
        signal.cancel();
    });

    server.run(shutdown).await.map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = ServeArgs {
            port: Some(9999),
            host: None,
            config: None,
        };
        let mut config = FootprintConfig::default();
        args.apply(&mut config);

        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.host, "127.0.0.1");
    }
}
