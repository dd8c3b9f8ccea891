//! Configuration for the Iggy broker connection.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;

/// Connection settings for [`crate::IggyBroker`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// TCP address of the Iggy server.
    #[serde(default = "default_address")]
    pub address: String,

    /// Username used to log in.
    #[serde(default = "default_username")]
    pub username: String,

    /// Password used to log in.
    #[serde(default = "default_password")]
    pub password: String,

    /// Iggy stream that holds one topic per channel.
    #[serde(default = "default_stream")]
    pub stream: String,

    /// Partitions created for each channel topic.
    #[serde(default = "default_partitions")]
    pub partitions: u32,

    /// Upper bound for establishing one connection.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// How long a receiver sleeps after an empty poll.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Maximum messages fetched per partition per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Reconnect backoff for both publisher and receiver connections.
    #[serde(default)]
    pub reconnect: Backoff,
}

fn default_address() -> String {
    "127.0.0.1:8090".to_string()
}

fn default_username() -> String {
    iggy::prelude::DEFAULT_ROOT_USERNAME.to_string()
}

fn default_password() -> String {
    iggy::prelude::DEFAULT_ROOT_PASSWORD.to_string()
}

fn default_stream() -> String {
    "footprint".to_string()
}

fn default_partitions() -> u32 {
    1
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_batch_size() -> u32 {
    100
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            username: default_username(),
            password: default_password(),
            stream: default_stream(),
            partitions: default_partitions(),
            connect_timeout: default_connect_timeout(),
            poll_interval: default_poll_interval(),
            batch_size: default_batch_size(),
            reconnect: Backoff::default(),
        }
    }
}

impl BrokerConfig {
    /// Use a custom server address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Use a custom stream name.
    #[must_use]
    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = stream.into();
        self
    }

    /// Use custom login credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Use a custom connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Use a custom reconnect backoff.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: Backoff) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Check the settings that would otherwise fail deep inside the SDK.
    pub fn validate(&self) -> crate::Result<()> {
        if self.address.trim().is_empty() {
            return Err(crate::Error::Config("address must not be empty".into()));
        }
        if self.stream.trim().is_empty() {
            return Err(crate::Error::Config("stream must not be empty".into()));
        }
        if self.partitions == 0 {
            return Err(crate::Error::Config("partitions must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(crate::Error::Config("batch_size must be at least 1".into()));
        }
        Ok(())
    }
}
