//! Iggy-backed Broker implementation.
//!
//! Each channel maps to one topic inside the configured stream. Publishing
//! goes through a single process-wide publisher connection; every
//! subscription opens its own dedicated receiver connection.
//!
//! # Reconnects
//!
//! A failed connection is not retried inline. The publisher remembers when
//! the next attempt is allowed (capped exponential backoff) and rejects
//! publishes with [`Error::Unavailable`] until then, so callers are never
//! held up by a dead broker. Receivers sleep out the same backoff between
//! reconnect attempts.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use iggy::prelude::*;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::traits::{Broker, Subscription};

/// Check if an Iggy error indicates a resource already exists.
fn is_already_exists_error(e: &IggyError) -> bool {
    let err_str = e.to_string();
    err_str.contains("already exists")
        || err_str.contains("already_exists")
        || err_str.contains("AlreadyExists")
}

fn named(name: &str) -> Result<Identifier> {
    Identifier::named(name).map_err(|e| Error::Iggy(format!("invalid name '{}': {}", name, e)))
}

/// Open, authenticate and prepare a client connection within the
/// configured connect timeout.
async fn open_client(config: &BrokerConfig) -> Result<IggyClient> {
    tokio::time::timeout(config.connect_timeout, open_client_inner(config))
        .await
        .map_err(|_| {
            Error::Connection(format!(
                "timed out connecting to {} after {:?}",
                config.address, config.connect_timeout
            ))
        })?
}

async fn open_client_inner(config: &BrokerConfig) -> Result<IggyClient> {
    let client = IggyClient::builder()
        .with_tcp()
        .with_server_address(config.address.clone())
        .build()
        .map_err(|e| Error::Connection(e.to_string()))?;

    client
        .connect()
        .await
        .map_err(|e| Error::Connection(e.to_string()))?;
    client
        .login_user(&config.username, &config.password)
        .await?;
    debug!(address = %config.address, "Logged in to Iggy");

    let streams = client.get_streams().await?;
    if !streams.iter().any(|s| s.name == config.stream) {
        match client.create_stream(&config.stream).await {
            Ok(_) => info!(stream = %config.stream, "Created stream"),
            Err(e) if is_already_exists_error(&e) => {
                debug!("Stream already exists (concurrent creation)");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(client)
}

/// Create the topic backing `channel` if it does not exist yet.
async fn ensure_topic(client: &IggyClient, config: &BrokerConfig, channel: &str) -> Result<()> {
    let stream_id = named(&config.stream)?;
    match client
        .create_topic(
            &stream_id,
            channel,
            config.partitions,
            CompressionAlgorithm::None,
            None, // replication_factor
            IggyExpiry::NeverExpire,
            MaxTopicSize::ServerDefault,
        )
        .await
    {
        Ok(_) => info!(channel, partitions = config.partitions, "Created channel topic"),
        Err(e) if is_already_exists_error(&e) => trace!(channel, "Channel topic already exists"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Tracks consecutive connection failures and when to try again.
#[derive(Debug, Default)]
struct ReconnectState {
    failures: u32,
    retry_at: Option<Instant>,
}

impl ReconnectState {
    fn record_failure(&mut self, config: &BrokerConfig) -> Duration {
        let delay = config.reconnect.delay(self.failures);
        self.failures = self.failures.saturating_add(1);
        self.retry_at = Some(Instant::now() + delay);
        delay
    }

    fn reset(&mut self) {
        self.failures = 0;
        self.retry_at = None;
    }

    fn remaining(&self) -> Option<Duration> {
        self.retry_at
            .and_then(|at| at.checked_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }
}

struct Publisher {
    client: Option<IggyClient>,
    topics: HashSet<String>,
    reconnect: ReconnectState,
}

/// Iggy-backed implementation of Broker.
pub struct IggyBroker {
    config: BrokerConfig,
    publisher: Mutex<Publisher>,
}

impl IggyBroker {
    /// Create a broker. No connection is made until the first publish or
    /// an explicit [`IggyBroker::connect`].
    pub fn new(config: BrokerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            publisher: Mutex::new(Publisher {
                client: None,
                topics: HashSet::new(),
                reconnect: ReconnectState::default(),
            }),
        })
    }

    /// The configuration this broker was built with.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Establish the publisher connection eagerly.
    ///
    /// Hosts that treat an unreachable broker at startup as fatal call this
    /// and propagate the error; others can skip it and let publishes
    /// reconnect lazily.
    pub async fn connect(&self) -> Result<()> {
        let mut publisher = self.publisher.lock().await;
        if publisher.client.is_some() {
            return Ok(());
        }
        let client = open_client(&self.config).await?;
        info!(address = %self.config.address, "Connected Iggy publisher");
        publisher.client = Some(client);
        publisher.reconnect.reset();
        Ok(())
    }

    /// Whether the publisher connection is currently up.
    pub async fn is_connected(&self) -> bool {
        self.publisher.lock().await.client.is_some()
    }

    /// Drop the publisher connection.
    pub async fn shutdown(&self) {
        let mut publisher = self.publisher.lock().await;
        if publisher.client.take().is_some() {
            info!("Closed Iggy publisher connection");
        }
    }

    async fn try_send(
        &self,
        client: &IggyClient,
        topics: &mut HashSet<String>,
        channel: &str,
        payload: Vec<u8>,
    ) -> Result<()> {
        if !topics.contains(channel) {
            ensure_topic(client, &self.config, channel).await?;
            topics.insert(channel.to_string());
        }

        let message = IggyMessage::builder()
            .payload(payload.into())
            .build()
            .map_err(|e| Error::Iggy(e.to_string()))?;

        let stream_id = named(&self.config.stream)?;
        let topic_id = named(channel)?;
        let mut messages = [message];
        client
            .send_messages(&stream_id, &topic_id, &Partitioning::balanced(), &mut messages)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Broker for IggyBroker {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        let mut guard = self.publisher.lock().await;
        let publisher = &mut *guard;

        if publisher.client.is_none() {
            if let Some(wait) = publisher.reconnect.remaining() {
                return Err(Error::Unavailable {
                    retry_in_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                });
            }
            match open_client(&self.config).await {
                Ok(client) => {
                    info!(address = %self.config.address, "Reconnected Iggy publisher");
                    publisher.client = Some(client);
                    publisher.topics.clear();
                    publisher.reconnect.reset();
                }
                Err(e) => {
                    let delay = publisher.reconnect.record_failure(&self.config);
                    warn!(error = %e, retry_in = ?delay, "Iggy publisher connect failed");
                    return Err(e);
                }
            }
        }

        let Some(client) = publisher.client.as_ref() else {
            return Err(Error::Connection("publisher not connected".into()));
        };

        match self
            .try_send(client, &mut publisher.topics, channel, payload)
            .await
        {
            Ok(()) => {
                trace!(channel, "Published to Iggy");
                Ok(())
            }
            Err(e) if e.is_connection_error() => {
                publisher.client = None;
                let delay = publisher.reconnect.record_failure(&self.config);
                warn!(error = %e, retry_in = ?delay, "Iggy connection lost");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        let client = open_client(&self.config).await?;
        ensure_topic(&client, &self.config, channel).await?;
        info!(channel, "Opened Iggy receiver connection");

        Ok(Box::new(IggySubscription {
            config: self.config.clone(),
            channel: channel.to_string(),
            consumer_name: format!("{}-rx-{}", channel, std::process::id()),
            client: Some(client),
            offsets: vec![None; self.config.partitions as usize],
            started_at: IggyTimestamp::now(),
            pending: VecDeque::new(),
            reconnect: ReconnectState::default(),
        }))
    }
}

/// Dedicated receiver connection for one channel.
///
/// Starts at the moment the subscription was opened: partitions without a
/// known offset are polled by timestamp, then tracked by offset.
pub struct IggySubscription {
    config: BrokerConfig,
    channel: String,
    consumer_name: String,
    client: Option<IggyClient>,
    offsets: Vec<Option<u64>>,
    started_at: IggyTimestamp,
    pending: VecDeque<Vec<u8>>,
    reconnect: ReconnectState,
}

impl IggySubscription {
    async fn reconnect(&mut self) -> Result<()> {
        let client = open_client(&self.config).await?;
        ensure_topic(&client, &self.config, &self.channel).await?;
        info!(channel = %self.channel, "Reconnected Iggy receiver");
        self.client = Some(client);
        self.reconnect.reset();
        Ok(())
    }

    /// Poll every partition once, queueing payloads into `pending`.
    async fn poll_partitions(&mut self) -> Result<()> {
        let Some(client) = self.client.as_ref() else {
            return Err(Error::Connection("receiver not connected".into()));
        };

        let stream_id = named(&self.config.stream)?;
        let topic_id = named(&self.channel)?;
        let consumer = Consumer::new(named(&self.consumer_name)?);

        for partition_id in 0..self.config.partitions {
            let idx = partition_id as usize;
            let strategy = match self.offsets[idx] {
                Some(offset) => PollingStrategy::offset(offset),
                None => PollingStrategy::timestamp(self.started_at),
            };

            let polled = client
                .poll_messages(
                    &stream_id,
                    &topic_id,
                    Some(partition_id),
                    &consumer,
                    &strategy,
                    self.config.batch_size,
                    false, // auto_commit
                )
                .await?;

            for msg in polled.messages {
                self.offsets[idx] = Some(msg.header.offset + 1);
                self.pending.push_back(msg.payload.to_vec());
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Subscription for IggySubscription {
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(payload) = self.pending.pop_front() {
                return Ok(Some(payload));
            }

            if self.client.is_none() {
                if let Some(wait) = self.reconnect.remaining() {
                    tokio::time::sleep(wait).await;
                }
                if let Err(e) = self.reconnect().await {
                    let delay = self.reconnect.record_failure(&self.config);
                    warn!(channel = %self.channel, error = %e, retry_in = ?delay, "Iggy receiver reconnect failed");
                }
                continue;
            }

            match self.poll_partitions().await {
                Ok(()) if self.pending.is_empty() => {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Ok(()) => {}
                Err(e) if e.is_connection_error() => {
                    warn!(channel = %self.channel, error = %e, "Iggy receiver connection lost");
                    self.client = None;
                    self.reconnect.record_failure(&self.config);
                }
                Err(e) => {
                    warn!(channel = %self.channel, error = %e, "Iggy poll failed");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    fn channel(&self) -> &str {
        &self.channel
    }
}
