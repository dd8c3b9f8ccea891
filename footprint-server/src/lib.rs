//! footprint-server - HTTP boundary for the footprint audit pipeline
//!
//! This crate owns the process-wide [`AuditPipeline`] and exposes a thin
//! records API. Every request passes through [`attribution_middleware`],
//! which runs it inside an attribution scope for the requesting actor and
//! records an activity event for mutating methods.

pub mod config;
mod error;
pub mod http;
pub mod middleware;
pub mod pipeline;
mod state;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use config::{PipelineConfig, ServerConfig, StoreConfig};
pub use error::ServerError;
pub use http::{Document, create_router};
pub use middleware::{HeaderActorExtractor, attribution_middleware};
pub use pipeline::{AuditPipeline, AuditPipelineBuilder};
pub use state::AppState;

/// The main footprint server
pub struct FootprintServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl FootprintServer {
    /// Start the audit pipeline described by `pipeline` and build the server.
    pub async fn start(config: ServerConfig, pipeline: &PipelineConfig) -> Result<Self, ServerError> {
        let extractor = HeaderActorExtractor::from_name(&config.actor_header).map_err(|e| {
            ServerError::Config(format!("invalid actor_header '{}': {}", config.actor_header, e))
        })?;
        let pipeline = Arc::new(AuditPipeline::from_config(pipeline).await?);
        let state = Arc::new(AppState::new(pipeline, extractor));

        Ok(Self { config, state })
    }

    /// Create a server with custom state (for testing)
    pub fn with_state(config: ServerConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the shared application state
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Run the server, binding to the configured address
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let addr = self.config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.clone(),
                source: e,
            })?;

        self.run_with_listener(listener, shutdown).await
    }

    /// Run the server on an already-bound listener until `shutdown` fires,
    /// then stop the audit pipeline.
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        tracing::info!("footprint server listening on {}", local_addr);

        let router = create_router(Arc::clone(&self.state));
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(|e| ServerError::Internal(e.to_string()));

        self.state.pipeline.shutdown().await;
        served
    }
}
