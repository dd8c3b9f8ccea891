//! Server error types

use thiserror::Error;

/// Errors that can occur while starting or running the footprint server
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to open the primary store or build the search index client
    #[error("sink setup failed: {0}")]
    Sink(#[from] footprint_sinks::Error),

    /// Failed to reach the broadcast broker at startup
    #[error("broker setup failed: {0}")]
    Broker(#[from] footprint_iggy::Error),

    /// Failed to open the broadcast receiver at startup
    #[error("broadcast setup failed: {0}")]
    Broadcast(#[from] footprint_core::BroadcastError),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}
