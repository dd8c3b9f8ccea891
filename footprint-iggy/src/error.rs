//! Error types for the broadcast transport.

/// Error type for broker operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error reported by the Iggy SDK.
    #[error("iggy error: {0}")]
    Iggy(String),

    /// Could not establish or keep a connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// The broker is known to be down and we are waiting out a backoff.
    #[error("broker unavailable (retry in {retry_in_ms} ms)")]
    Unavailable { retry_in_ms: u64 },

    /// Payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid broker configuration.
    #[error("invalid config: {0}")]
    Config(String),
}

impl From<iggy::prelude::IggyError> for Error {
    fn from(e: iggy::prelude::IggyError) -> Self {
        Self::Iggy(e.to_string())
    }
}

impl Error {
    /// Whether this error means the connection is gone and should be rebuilt.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Unavailable { .. } => true,
            Self::Iggy(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("connection")
                    || msg.contains("disconnected")
                    || msg.contains("not connected")
                    || msg.contains("broken pipe")
                    || msg.contains("reset")
            }
            Self::Serialization(_) | Self::Config(_) => false,
        }
    }
}

/// Result type alias for broker operations.
pub type Result<T> = std::result::Result<T, Error>;
